//! Payload transfer
//!
//! Payloads travel out of band: the packet announcing one carries
//! `payloadTransferInfo`, and the bytes flow over a separate TLS connection.
//!
//! - [`state`]: pure state machine of an upload job
//! - [`source`]: readable payload sources
//! - [`upload`]: the sending job (listens, serves one peer)
//! - [`download`]: the receiving client

pub mod download;
pub mod source;
pub mod state;
pub mod upload;

pub use download::PayloadClient;
pub use source::{BytesSource, FileSource, PayloadReader, PayloadSource};
pub use state::{JobError, JobResult, JobState, Step, TransferEvent, TransferStateMachine};
pub use upload::{
    ProgressCallback, UploadHandle, UploadJob, ACCEPT_TIMEOUT, MAX_PORT, MIN_PORT,
    TRANSFER_TIMEOUT,
};
