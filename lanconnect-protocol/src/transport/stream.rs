//! Newline-framed packet stream
//!
//! Wraps any byte stream (plain TCP before pairing, TLS after) and exchanges
//! [`Packet`]s one per line. Malformed lines are logged and skipped so a
//! single bad packet does not take the link down.

use crate::{Packet, ProtocolError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Maximum packet size (10 MiB)
pub const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

pub struct PacketStream<S> {
    inner: BufReader<S>,
}

impl<S> PacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Send one packet and flush
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.to_bytes()?;
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketSizeExceeded(bytes.len(), MAX_PACKET_SIZE));
        }

        let stream = self.inner.get_mut();
        stream.write_all(&bytes).await?;
        stream.flush().await?;

        debug!("Sent packet type: {}", packet.packet_type);
        Ok(())
    }

    /// Receive the next well-formed packet
    ///
    /// Returns `Ok(None)` once the peer closes the stream.
    pub async fn receive_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let mut line = Vec::new();
            let read = (&mut self.inner)
                .take(MAX_PACKET_SIZE as u64 + 1)
                .read_until(b'\n', &mut line)
                .await?;

            if read == 0 {
                debug!("Packet stream closed by peer");
                return Ok(None);
            }

            if line.len() > MAX_PACKET_SIZE {
                return Err(ProtocolError::PacketSizeExceeded(line.len(), MAX_PACKET_SIZE));
            }

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match Packet::from_bytes(&line) {
                Ok(packet) => {
                    debug!("Received packet type: {}", packet.packet_type);
                    return Ok(Some(packet));
                }
                Err(e) => warn!("Dropping malformed packet: {}", e),
            }
        }
    }

    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Unwrap the stream; bytes already buffered are lost
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}
