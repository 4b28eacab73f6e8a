//! Upload job state machine
//!
//! The machine is a plain value: the async driver in [`super::upload`]
//! translates socket and stream readiness into [`TransferEvent`]s and feeds
//! them in. Keeping it free of I/O lets every ordering rule be tested without
//! sockets.
//!
//! ```text
//! Idle -> Listening -> Connected -> Handshaking -> Transferring -> Succeeded
//!   \          \            \             \              \
//!    +----------+------------+-------------+--------------+--> Failed
//! ```
//!
//! The terminal result is reported once, as [`Step::Completed`]. Every event
//! after that is ignored.

use thiserror::Error;
use tracing::{debug, warn};

/// Terminal failure of a payload transfer job
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Every port in the payload range is taken
    #[error("Couldn't find an available port")]
    NoAvailablePort,

    /// Source or socket I/O failed; carries the underlying error text
    #[error("{0}")]
    Io(String),

    /// The link provider could not set up TLS for the peer
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The peer failed the TLS handshake (e.g. untrusted certificate)
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transfer cancelled")]
    Cancelled,
}

impl JobError {
    /// Numeric code reported alongside the error text
    pub fn code(&self) -> u32 {
        match self {
            JobError::NoAvailablePort => 1,
            JobError::Io(_) => 2,
            JobError::Tls(_) => 3,
            JobError::Handshake(_) => 4,
            JobError::Timeout(_) => 5,
            JobError::Cancelled => 6,
        }
    }
}

/// Outcome of a job: bytes sent on success
pub type JobResult = std::result::Result<u64, JobError>;

/// Job lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Listening,
    Connected,
    Handshaking,
    Transferring,
    Succeeded,
    Failed(JobError),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed(_))
    }
}

/// Discrete events delivered to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A listening socket was bound
    Bound { port: u16 },
    /// The port scan ran out of candidates
    NoPortAvailable,
    /// A connection arrived but the source could not be opened
    SourceOpenFailed(String),
    /// A connection arrived and the source is open
    Accepted,
    /// TLS session configured, handshake started
    TlsConfigured,
    TlsSetupFailed(String),
    HandshakeSucceeded,
    HandshakeFailed(String),
    /// Chunk written to the peer
    BytesWritten(u64),
    /// The source reached end of stream
    SourceExhausted,
    IoFailed(String),
    TimedOut(String),
    Cancelled,
}

/// What the driver must do after handing in an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// State moved (or counters updated); keep going
    Advanced,
    /// Terminal state reached, here is the one and only result
    Completed(JobResult),
    /// Extra inbound connection; close it
    Rejected,
    /// Event not applicable in the current state (or after completion)
    Ignored,
}

/// Pure upload job state machine
#[derive(Debug, Clone)]
pub struct TransferStateMachine {
    state: JobState,
    port: Option<u16>,
    bytes_transferred: u64,
}

impl Default for TransferStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStateMachine {
    pub fn new() -> Self {
        Self {
            state: JobState::Idle,
            port: None,
            bytes_transferred: 0,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Port chosen by the scan; set from `Listening` on
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Terminal result, if the job has finished
    pub fn result(&self) -> Option<JobResult> {
        match &self.state {
            JobState::Succeeded => Some(Ok(self.bytes_transferred)),
            JobState::Failed(error) => Some(Err(error.clone())),
            _ => None,
        }
    }

    /// Apply one event
    pub fn handle(&mut self, event: TransferEvent) -> Step {
        use JobState as S;
        use TransferEvent as E;

        if self.state.is_terminal() {
            debug!("Ignoring {:?} after job completion", event);
            return Step::Ignored;
        }

        let next = match (&self.state, event) {
            (S::Idle, E::Bound { port }) => {
                self.port = Some(port);
                S::Listening
            }
            (S::Idle, E::NoPortAvailable) => S::Failed(JobError::NoAvailablePort),

            (S::Listening, E::SourceOpenFailed(reason)) => S::Failed(JobError::Io(reason)),
            (S::Listening, E::Accepted) => S::Connected,
            (S::Connected | S::Handshaking | S::Transferring, E::Accepted) => {
                debug!("Rejecting additional payload connection");
                return Step::Rejected;
            }

            (S::Connected, E::TlsConfigured) => S::Handshaking,
            (S::Connected, E::TlsSetupFailed(reason)) => S::Failed(JobError::Tls(reason)),

            (S::Handshaking, E::HandshakeSucceeded) => S::Transferring,
            (S::Handshaking, E::HandshakeFailed(reason)) => {
                S::Failed(JobError::Handshake(reason))
            }

            (S::Transferring, E::BytesWritten(count)) => {
                self.bytes_transferred += count;
                return Step::Advanced;
            }
            (S::Transferring, E::SourceExhausted) => S::Succeeded,

            (S::Listening | S::Connected | S::Handshaking | S::Transferring, E::IoFailed(reason)) => {
                S::Failed(JobError::Io(reason))
            }
            (S::Listening | S::Connected | S::Handshaking | S::Transferring, E::TimedOut(what)) => {
                S::Failed(JobError::Timeout(what))
            }
            (_, E::Cancelled) => S::Failed(JobError::Cancelled),

            (state, event) => {
                warn!("Unexpected {:?} in state {:?}", event, state);
                return Step::Ignored;
            }
        };

        debug!("Payload job {:?} -> {:?}", self.state, next);
        self.state = next;

        match self.result() {
            Some(result) => Step::Completed(result),
            None => Step::Advanced,
        }
    }
}
