//! Download side of a payload transfer
//!
//! The receiver dials the port advertised in `payloadTransferInfo` and takes
//! the TLS *client* role.
//!
//! ```rust,ignore
//! let client = PayloadClient::for_packet(peer_ip, &packet, peer_id, provider.as_ref()).await?;
//! client.receive_file("/path/to/save/file.pdf", packet.payload_size).await?;
//! ```

use super::upload::{ProgressCallback, TRANSFER_TIMEOUT};
use crate::transport::LinkProvider;
use crate::{Packet, ProtocolError, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::pin::Pin;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_openssl::SslStream;
use tracing::{debug, info, warn};

/// Default timeout for TCP connections (30 seconds)
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const BUFFER_SIZE: usize = 65536;

/// TLS client for receiving a payload
pub struct PayloadClient {
    stream: SslStream<TcpStream>,
    remote_addr: SocketAddr,
    progress_callback: Option<ProgressCallback>,
}

impl PayloadClient {
    /// Dial a payload port and complete the TLS handshake
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails or times out, or if the peer
    /// does not present the certificate paired with `device_id`.
    pub async fn connect(
        addr: SocketAddr,
        device_id: &str,
        provider: &dyn LinkProvider,
    ) -> Result<Self> {
        info!("Connecting to payload server at {}", addr);

        let tcp = timeout(CONNECTION_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connecting to {}", addr)))?
            .map_err(|e| ProtocolError::from_io_error(e, &format!("connecting to {}", addr)))?;

        let ssl = provider.configure_ssl(device_id, false)?;
        let mut stream = SslStream::new(ssl, tcp)?;

        timeout(TRANSFER_TIMEOUT, Pin::new(&mut stream).connect())
            .await
            .map_err(|_| ProtocolError::Timeout(format!("TLS handshake with {}", addr)))??;

        info!("Connected to payload server at {}", addr);

        Ok(Self {
            stream,
            remote_addr: addr,
            progress_callback: None,
        })
    }

    /// Dial the port announced by `packet`
    pub async fn for_packet(
        host: IpAddr,
        packet: &Packet,
        device_id: &str,
        provider: &dyn LinkProvider,
    ) -> Result<Self> {
        let port = packet.transfer_port().ok_or_else(|| {
            ProtocolError::InvalidPacket(format!(
                "packet '{}' carries no payload port",
                packet.packet_type
            ))
        })?;

        Self::connect(SocketAddr::new(host, port), device_id, provider).await
    }

    /// Set a progress callback for transfer updates
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Copy the payload into `writer`
    ///
    /// With a known `expected_size` exactly that many bytes are read and a
    /// short stream is an error. With -1 the payload runs until the sender
    /// closes the session.
    pub async fn receive_to<W>(mut self, writer: &mut W, expected_size: i64) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let expected = u64::try_from(expected_size).ok();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total_bytes = 0u64;

        loop {
            let to_read = match expected {
                Some(expected) if total_bytes >= expected => break,
                Some(expected) => std::cmp::min(expected - total_bytes, BUFFER_SIZE as u64) as usize,
                None => BUFFER_SIZE,
            };

            let bytes_read = timeout(TRANSFER_TIMEOUT, self.stream.read(&mut buffer[..to_read]))
                .await
                .map_err(|_| {
                    ProtocolError::Timeout("Stream read timeout during payload transfer".to_string())
                })?
                .map_err(|e| ProtocolError::from_io_error(e, "reading payload"))?;

            if bytes_read == 0 {
                if let Some(expected) = expected {
                    return Err(ProtocolError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "Connection closed prematurely: received {} bytes, expected {}",
                            total_bytes, expected
                        ),
                    )));
                }
                break;
            }

            writer.write_all(&buffer[..bytes_read]).await?;
            total_bytes += bytes_read as u64;

            debug!(
                "Received {} bytes ({}/{} total)",
                bytes_read, total_bytes, expected_size
            );

            if let Some(ref callback) = self.progress_callback {
                if !callback(total_bytes, expected_size) {
                    info!("Transfer cancelled by progress callback");
                    return Err(ProtocolError::Transfer(super::JobError::Cancelled));
                }
            }
        }

        writer.flush().await?;
        if let Err(e) = self.stream.shutdown().await {
            debug!("TLS shutdown with {} incomplete: {}", self.remote_addr, e);
        }

        info!(
            "Payload received: {} bytes from {}",
            total_bytes, self.remote_addr
        );
        Ok(total_bytes)
    }

    /// Receive the payload into a file, removing it again on failure
    pub async fn receive_file(self, save_path: impl AsRef<Path>, expected_size: i64) -> Result<u64> {
        let save_path = save_path.as_ref();
        info!(
            "Receiving file to {:?} ({} bytes expected)",
            save_path, expected_size
        );

        if let Some(parent) = save_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ProtocolError::from_io_error(e, &format!("creating {}", parent.display()))
                })?;
            }
        }

        let mut file = File::create(save_path).await.map_err(|e| {
            ProtocolError::from_io_error(e, &format!("creating {}", save_path.display()))
        })?;

        let result = self.receive_to(&mut file, expected_size).await;

        if result.is_err() {
            warn!("Transfer failed, cleaning up partial file: {:?}", save_path);
            drop(file);
            if let Err(e) = tokio::fs::remove_file(save_path).await {
                warn!("Failed to remove partial file {:?}: {}", save_path, e);
            }
        }

        result
    }
}
