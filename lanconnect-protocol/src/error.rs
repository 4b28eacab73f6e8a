//! Error handling for the LAN Connect protocol
//!
//! Two error types live here:
//!
//! - [`ProtocolError`]: crate-wide error returned through [`Result`]. Underlying
//!   library errors (`std::io`, `serde_json`, OpenSSL) convert into it with `?`.
//! - [`CryptoError`]: failures of the identity authority (key generation and
//!   certificate signing). Kept separate so callers can tell a configuration
//!   mistake (wrong key kind) from a failing cryptographic primitive.
//!
//! Payload transfer jobs report their terminal failures as
//! [`JobError`](crate::payload::JobError), which also converts into
//! [`ProtocolError`].
//!
//! ## Propagation
//!
//! Codec errors are recovered where they happen: a malformed packet is logged
//! and dropped, the link keeps running. Job and crypto errors always reach the
//! caller; nothing in this crate retries.
//!
//! ```rust
//! use lanconnect_protocol::{Packet, ProtocolError};
//!
//! match Packet::from_bytes(b"{not json") {
//!     Err(ProtocolError::Decode(reason)) => assert!(!reason.is_empty()),
//!     other => panic!("unexpected result: {:?}", other),
//! }
//! ```

use crate::payload::JobError;
use openssl::error::ErrorStack;
use openssl::pkey::Id;
use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error (file system, network, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TLS session error
    #[error("TLS error: {0}")]
    Tls(#[from] openssl::ssl::Error),

    /// OpenSSL library error outside of a TLS session (contexts, PEM parsing)
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    /// Identity authority failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Payload transfer job failure
    #[error("Transfer failed: {0}")]
    Transfer(#[from] JobError),

    /// A received packet could not be decoded
    ///
    /// Carries the JSON parser diagnostic.
    #[error("Failed to decode packet: {0}")]
    Decode(String),

    /// Invalid or malformed packet
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Packet size exceeded
    #[error("Packet size exceeded: {0} bytes (max: {1})")]
    PacketSizeExceeded(usize, usize),

    /// Peer certificate does not match the trusted record, or no record exists
    #[error("Certificate validation error: {0}")]
    CertificateValidation(String),

    /// Operation invoked in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Network connection error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Connection timeout
    #[error("Connection timeout: {0}")]
    Timeout(String),

    /// Connection refused
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Network unreachable
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProtocolError {
    /// Convert a generic I/O error into a more specific network error
    ///
    /// ```rust
    /// use lanconnect_protocol::ProtocolError;
    /// use std::io::{Error, ErrorKind};
    ///
    /// let io_error = Error::new(ErrorKind::TimedOut, "connection timeout");
    /// let error = ProtocolError::from_io_error(io_error, "connecting to device");
    ///
    /// assert!(matches!(error, ProtocolError::Timeout(_)));
    /// ```
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(format!("{}: {}", context, error)),
            ErrorKind::ConnectionRefused => {
                ProtocolError::ConnectionRefused(format!("{}: {}", context, error))
            }
            ErrorKind::NetworkUnreachable => {
                ProtocolError::NetworkUnreachable(format!("{}: {}", context, error))
            }
            ErrorKind::PermissionDenied => {
                ProtocolError::PermissionDenied(format!("{}: {}", context, error))
            }
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                ProtocolError::NetworkError(format!(
                    "{}: connection interrupted ({})",
                    context, error
                ))
            }
            _ => ProtocolError::Io(error),
        }
    }

    /// Check if this error is transient
    ///
    /// This layer never retries by itself. The flag is for callers that own
    /// a retry policy.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProtocolError::Timeout(_)
            | ProtocolError::NetworkError(_)
            | ProtocolError::NetworkUnreachable(_)
            | ProtocolError::ConnectionRefused(_)
            | ProtocolError::Io(_) => true,
            ProtocolError::Transfer(job) => matches!(
                job,
                JobError::NoAvailablePort | JobError::Timeout(_) | JobError::Io(_)
            ),
            _ => false,
        }
    }

    /// Check if this error requires user action (re-pairing, fixing settings)
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            ProtocolError::Crypto(_)
                | ProtocolError::CertificateValidation(_)
                | ProtocolError::PermissionDenied(_)
                | ProtocolError::Configuration(_)
        )
    }
}

/// Failures of key generation and certificate signing
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The key pair could not be generated (e.g. unsupported modulus size)
    #[error("key generation failed for {bits} bits: {source}")]
    KeyGeneration {
        bits: u32,
        #[source]
        source: ErrorStack,
    },

    /// A public key was supplied where a private key is required
    #[error("key is not a private key")]
    NotPrivateKey,

    /// Only RSA, DSA and EC keys can sign device certificates
    #[error("unsupported key algorithm: {0:?}")]
    UnsupportedKeyAlgorithm(Id),

    /// Key material could not be parsed
    #[error("invalid key material: {0}")]
    InvalidKey(#[source] ErrorStack),

    /// Building or signing the certificate failed inside OpenSSL
    #[error("certificate signing failed: {0}")]
    Signing(#[source] ErrorStack),

    /// Converting the certificate or key to PEM/DER failed
    #[error("certificate encoding failed: {0}")]
    Encoding(#[source] ErrorStack),

    /// Validity timestamps outside the representable range
    #[error("invalid validity window: {0}")]
    InvalidValidity(String),
}
