//! Upload side of a payload transfer
//!
//! ## Protocol
//!
//! 1. Sender binds the first free port in 1739..=1764
//! 2. Sender attaches `{"port": N}` as `payloadTransferInfo` to the packet
//!    announcing the payload
//! 3. Receiver dials that port; sender takes the TLS *server* role
//! 4. Raw payload bytes are streamed, then the session is closed
//!
//! One connection per job: the listener is closed as soon as the first peer
//! is accepted.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut job = UploadJob::new(peer_id, FileSource::from_path(path).await?, provider);
//! job.start()?;
//! let packet = Packet::new("kdeconnect.share.request", json!({"filename": name}))
//!     .with_payload(job.payload_size(), job.transfer_info()?);
//! stream.send_packet(&packet).await?;
//! let sent = job.run().await?;
//! ```

use super::source::PayloadSource;
use super::state::{JobError, JobResult, JobState, TransferEvent, TransferStateMachine};
use crate::transport::LinkProvider;
use crate::{ProtocolError, Result};
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_openssl::SslStream;
use tracing::{debug, info, warn};

/// First port of the payload range
pub const MIN_PORT: u16 = 1739;

/// Last port of the payload range (inclusive)
pub const MAX_PORT: u16 = 1764;

/// Default time to wait for the receiver to connect
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit for a handshake or a single read/write
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Buffer size for payload streaming (64KB)
const BUFFER_SIZE: usize = 65536;

/// Progress callback for transfers
///
/// Receives `(bytes_transferred, declared_size)`; the size is -1 when
/// unknown. Return `false` to cancel the transfer.
pub type ProgressCallback = Box<dyn Fn(u64, i64) -> bool + Send + Sync>;

/// One outgoing payload, served to one peer
pub struct UploadJob {
    device_id: String,
    source: Box<dyn PayloadSource>,
    provider: Arc<dyn LinkProvider>,
    machine: TransferStateMachine,
    listener: Option<std::net::TcpListener>,
    bind_addr: IpAddr,
    port_range: RangeInclusive<u16>,
    accept_timeout: Duration,
    transfer_timeout: Duration,
    progress_callback: Option<ProgressCallback>,
}

impl UploadJob {
    /// Create a job for `device_id`; nothing is bound until [`start`](Self::start)
    pub fn new(
        device_id: impl Into<String>,
        source: impl PayloadSource + 'static,
        provider: Arc<dyn LinkProvider>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            source: Box::new(source),
            provider,
            machine: TransferStateMachine::new(),
            listener: None,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_range: MIN_PORT..=MAX_PORT,
            accept_timeout: ACCEPT_TIMEOUT,
            transfer_timeout: TRANSFER_TIMEOUT,
            progress_callback: None,
        }
    }

    /// Scan a different port range
    pub fn with_port_range(mut self, ports: RangeInclusive<u16>) -> Self {
        self.port_range = ports;
        self
    }

    /// Listen on a specific address instead of all interfaces
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_timeouts(mut self, accept: Duration, transfer: Duration) -> Self {
        self.accept_timeout = accept;
        self.transfer_timeout = transfer;
        self
    }

    /// Set a progress callback for transfer updates
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> &JobState {
        self.machine.state()
    }

    /// Port the job is listening on, once started
    pub fn port(&self) -> Option<u16> {
        self.machine.port()
    }

    /// Declared payload size for the announcing packet
    pub fn payload_size(&self) -> i64 {
        self.source.size()
    }

    /// Bind the first free port in the range
    ///
    /// Returns the bound port. On exhaustion the job fails with
    /// [`JobError::NoAvailablePort`] and that error is returned.
    pub fn start(&mut self) -> Result<u16> {
        if *self.machine.state() != JobState::Idle {
            return Err(ProtocolError::InvalidState(
                "upload job already started".to_string(),
            ));
        }

        for port in self.port_range.clone() {
            let bound = std::net::TcpListener::bind((self.bind_addr, port))
                .and_then(|listener| listener.set_nonblocking(true).map(|_| listener));

            match bound {
                Ok(listener) => {
                    self.listener = Some(listener);
                    self.machine.handle(TransferEvent::Bound { port });
                    info!(
                        "Payload for {} listening on {}:{}",
                        self.device_id, self.bind_addr, port
                    );
                    return Ok(port);
                }
                Err(e) => debug!("Port {} unavailable: {}", port, e),
            }
        }

        warn!(
            "Error opening a port in range {}-{}",
            self.port_range.start(),
            self.port_range.end()
        );
        self.machine.handle(TransferEvent::NoPortAvailable);
        Err(JobError::NoAvailablePort.into())
    }

    /// Mapping to attach as `payloadTransferInfo`: `{"port": N}`
    pub fn transfer_info(&self) -> Result<Map<String, Value>> {
        let port = self.machine.port().ok_or_else(|| {
            ProtocolError::InvalidState("upload job has no listening port".to_string())
        })?;

        let mut info = Map::new();
        info.insert("port".to_string(), Value::from(port));
        Ok(info)
    }

    /// Serve the payload to the first peer and report the outcome
    ///
    /// Starts the job first if [`start`](Self::start) was not called.
    /// Dropping the returned future closes every socket the job holds.
    pub async fn run(mut self) -> JobResult {
        self.drive().await
    }

    /// Run on a background task
    ///
    /// The job is started if needed so the port is known to the caller.
    pub fn spawn(mut self) -> Result<UploadHandle> {
        let port = match self.machine.port() {
            Some(port) => port,
            None => self.start()?,
        };
        let transfer_info = self.transfer_info()?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(self.run_until_cancelled(cancel_rx));

        Ok(UploadHandle {
            port,
            transfer_info,
            cancel: Some(cancel_tx),
            task,
        })
    }

    async fn run_until_cancelled(mut self, cancel: oneshot::Receiver<()>) -> JobResult {
        let finished = tokio::select! {
            result = self.drive() => Some(result),
            _ = cancel => None,
        };

        match finished {
            Some(result) => result,
            None => {
                info!("Payload upload to {} cancelled", self.device_id);
                self.listener = None;
                self.complete(TransferEvent::Cancelled)
            }
        }
    }

    /// Feed a terminal-bound event and return the job result
    fn complete(&mut self, event: TransferEvent) -> JobResult {
        self.machine.handle(event);
        match self.machine.result() {
            Some(result) => result,
            None => Err(JobError::Io(format!(
                "transfer stopped in state {:?}",
                self.machine.state()
            ))),
        }
    }

    async fn drive(&mut self) -> JobResult {
        if *self.machine.state() == JobState::Idle {
            // Failure is recorded in the state machine
            let _ = self.start();
        }
        if let Some(result) = self.machine.result() {
            return result;
        }

        let listener = match self.listener.take().map(TcpListener::from_std) {
            Some(Ok(listener)) => listener,
            Some(Err(e)) => return self.complete(TransferEvent::IoFailed(e.to_string())),
            None => {
                return self.complete(TransferEvent::IoFailed(
                    "listening socket already consumed".to_string(),
                ))
            }
        };

        let (tcp, remote_addr) = match timeout(self.accept_timeout, listener.accept()).await {
            Err(_) => {
                warn!("No connection for payload to {}", self.device_id);
                return self.complete(TransferEvent::TimedOut(
                    "waiting for receiver to connect".to_string(),
                ));
            }
            Ok(Err(e)) => return self.complete(TransferEvent::IoFailed(e.to_string())),
            Ok(Ok(accepted)) => accepted,
        };
        drop(listener);
        info!("Accepted payload connection from {}", remote_addr);

        let mut reader = match self.source.open().await {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Error when opening the input to upload: {}", e);
                return self.complete(TransferEvent::SourceOpenFailed(e.to_string()));
            }
        };
        self.machine.handle(TransferEvent::Accepted);

        let ssl = match self.provider.configure_ssl(&self.device_id, true) {
            Ok(ssl) => ssl,
            Err(e) => return self.complete(TransferEvent::TlsSetupFailed(e.to_string())),
        };
        let mut stream = match SslStream::new(ssl, tcp) {
            Ok(stream) => stream,
            Err(e) => return self.complete(TransferEvent::TlsSetupFailed(e.to_string())),
        };
        self.machine.handle(TransferEvent::TlsConfigured);

        match timeout(self.transfer_timeout, Pin::new(&mut stream).accept()).await {
            Err(_) => {
                return self.complete(TransferEvent::TimedOut("TLS handshake".to_string()))
            }
            Ok(Err(e)) => {
                warn!("TLS handshake with {} failed: {}", self.device_id, e);
                return self.complete(TransferEvent::HandshakeFailed(e.to_string()));
            }
            Ok(Ok(())) => {}
        }
        self.machine.handle(TransferEvent::HandshakeSucceeded);

        let total = self.source.size();
        let mut buffer = vec![0u8; BUFFER_SIZE];

        loop {
            let bytes_read = match timeout(self.transfer_timeout, reader.read(&mut buffer)).await {
                Err(_) => {
                    return self.complete(TransferEvent::TimedOut("source read".to_string()))
                }
                Ok(Err(e)) => return self.complete(TransferEvent::IoFailed(e.to_string())),
                Ok(Ok(n)) => n,
            };

            if bytes_read == 0 {
                break;
            }

            match timeout(
                self.transfer_timeout,
                stream.write_all(&buffer[..bytes_read]),
            )
            .await
            {
                Err(_) => {
                    return self.complete(TransferEvent::TimedOut("stream write".to_string()))
                }
                Ok(Err(e)) => return self.complete(TransferEvent::IoFailed(e.to_string())),
                Ok(Ok(())) => {}
            }

            self.machine
                .handle(TransferEvent::BytesWritten(bytes_read as u64));
            let transferred = self.machine.bytes_transferred();
            debug!("Transferred {} bytes ({}/{} total)", bytes_read, transferred, total);

            let keep_going = self
                .progress_callback
                .as_ref()
                .map_or(true, |callback| callback(transferred, total));
            if !keep_going {
                info!("Transfer cancelled by progress callback");
                return self.complete(TransferEvent::Cancelled);
            }
        }

        if let Err(e) = stream.flush().await {
            return self.complete(TransferEvent::IoFailed(e.to_string()));
        }
        if let Err(e) = stream.shutdown().await {
            debug!("TLS shutdown with {} incomplete: {}", remote_addr, e);
        }

        info!(
            "Payload transfer complete: {} bytes sent to {}",
            self.machine.bytes_transferred(),
            remote_addr
        );
        self.complete(TransferEvent::SourceExhausted)
    }
}

/// Handle to a spawned upload
///
/// Dropping the handle cancels the job.
pub struct UploadHandle {
    port: u16,
    transfer_info: Map<String, Value>,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<JobResult>,
}

impl UploadHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transfer_info(&self) -> &Map<String, Value> {
        &self.transfer_info
    }

    /// Stop the job; a job that already finished keeps its result
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Wait for the job result
    pub async fn wait(self) -> JobResult {
        let UploadHandle { cancel, task, .. } = self;
        let joined = task.await;
        drop(cancel);

        joined.unwrap_or_else(|e| Err(JobError::Io(format!("upload task failed: {}", e))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::source::{BytesSource, FileSource};
    use openssl::ssl::Ssl;

    /// Provider that never gets far enough to be asked
    struct NoTls;

    impl LinkProvider for NoTls {
        fn configure_ssl(&self, device_id: &str, _is_server: bool) -> Result<Ssl> {
            Err(ProtocolError::CertificateValidation(format!(
                "No trusted certificate for device {}",
                device_id
            )))
        }
    }

    fn occupied_port() -> (std::net::TcpListener, u16) {
        let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_start_binds_in_range() {
        let mut job = UploadJob::new("peer", BytesSource::new(b"x".to_vec()), Arc::new(NoTls))
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));

        assert!(job.transfer_info().is_err());

        let port = job.start().unwrap();
        assert!((MIN_PORT..=MAX_PORT).contains(&port));
        assert_eq!(job.state(), &JobState::Listening);
        assert_eq!(job.transfer_info().unwrap()["port"], Value::from(port));
        assert!(matches!(job.start(), Err(ProtocolError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_port_exhaustion() {
        let (_held, taken) = occupied_port();

        let mut job = UploadJob::new("peer", BytesSource::new(b"x".to_vec()), Arc::new(NoTls))
            .with_port_range(taken..=taken);

        let error = job.start().unwrap_err();
        assert!(matches!(
            error,
            ProtocolError::Transfer(JobError::NoAvailablePort)
        ));
        assert_eq!(job.state(), &JobState::Failed(JobError::NoAvailablePort));
        assert!(job.transfer_info().is_err());
        assert_eq!(job.run().await, Err(JobError::NoAvailablePort));
    }

    #[tokio::test]
    async fn test_accept_timeout() {
        let mut job = UploadJob::new("peer", BytesSource::new(b"x".to_vec()), Arc::new(NoTls))
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_timeouts(Duration::from_millis(100), TRANSFER_TIMEOUT);
        job.start().unwrap();

        assert!(matches!(job.run().await, Err(JobError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_source_open_failure_after_connect() {
        let mut job = UploadJob::new(
            "peer",
            FileSource::new("/nonexistent/file.txt", 12),
            Arc::new(NoTls),
        )
        .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let port = job.start().unwrap();

        let task = tokio::spawn(job.run());
        let _client = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(JobError::Io(_))));
        assert_eq!(result.unwrap_err().code(), 2);
    }

    #[tokio::test]
    async fn test_tls_setup_failure() {
        let mut job = UploadJob::new("stranger", BytesSource::new(b"x".to_vec()), Arc::new(NoTls))
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let port = job.start().unwrap();

        let task = tokio::spawn(job.run());
        let _client = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();

        assert!(matches!(task.await.unwrap(), Err(JobError::Tls(_))));
    }

    #[tokio::test]
    async fn test_spawned_job_cancel() {
        let job = UploadJob::new("peer", BytesSource::new(b"x".to_vec()), Arc::new(NoTls))
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let mut handle = job.spawn().unwrap();
        let port = handle.port();
        assert_eq!(handle.transfer_info()["port"], Value::from(port));

        handle.cancel();
        assert_eq!(handle.wait().await, Err(JobError::Cancelled));

        // Listener released
        let rebound = std::net::TcpListener::bind(("127.0.0.1", port));
        assert!(rebound.is_ok());
    }
}
