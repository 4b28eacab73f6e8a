//! Payload sources
//!
//! A source is opened lazily: the upload job only opens it once a peer has
//! connected, so an unused offer never holds a file handle.

use crate::packet::UNKNOWN_PAYLOAD_SIZE;
use crate::{ProtocolError, Result};
use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs::File;
use tokio::io::AsyncRead;

/// Byte stream handed to the payload channel
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// Readable payload with an optional declared size
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Declared size in bytes, or -1 if unknown
    fn size(&self) -> i64;

    /// Open the source for reading
    async fn open(&mut self) -> std::io::Result<PayloadReader>;
}

/// File on disk, opened on first connection
#[derive(Debug, Clone)]
pub struct FileSource {
    /// File name (with extension)
    pub filename: String,

    /// File path for reading
    pub path: PathBuf,

    /// Size in bytes, -1 if unknown
    pub size: i64,

    /// Creation time (UNIX milliseconds)
    pub creation_time: Option<i64>,

    /// Last modified time (UNIX milliseconds)
    pub last_modified: Option<i64>,
}

impl FileSource {
    /// Describe a file without touching the filesystem
    ///
    /// Failure to open surfaces later, when a peer connects.
    pub fn new(path: impl Into<PathBuf>, size: i64) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            filename,
            path,
            size,
            creation_time: None,
            last_modified: None,
        }
    }

    /// Extract size and timestamps from file metadata
    ///
    /// # Errors
    ///
    /// Returns error if the file doesn't exist or has no usable name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ProtocolError::from_io_error(e, &format!("reading {}", path.display())))?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ProtocolError::InvalidPacket(format!("Invalid filename: {}", path.display()))
            })?
            .to_string();

        let millis = |time: std::io::Result<std::time::SystemTime>| {
            time.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
        };

        Ok(Self {
            filename,
            path: path.to_path_buf(),
            size: metadata.len() as i64,
            creation_time: millis(metadata.created()),
            last_modified: millis(metadata.modified()),
        })
    }
}

#[async_trait]
impl PayloadSource for FileSource {
    fn size(&self) -> i64 {
        self.size
    }

    async fn open(&mut self) -> std::io::Result<PayloadReader> {
        let file = File::open(&self.path).await?;
        Ok(Box::new(file))
    }
}

/// In-memory payload
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Vec<u8>,
    declared_size: i64,
}

impl BytesSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let declared_size = data.len() as i64;
        Self {
            data,
            declared_size,
        }
    }

    /// Same bytes, but announced with an unknown size
    pub fn with_unknown_size(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            declared_size: UNKNOWN_PAYLOAD_SIZE,
        }
    }
}

#[async_trait]
impl PayloadSource for BytesSource {
    fn size(&self) -> i64 {
        self.declared_size
    }

    async fn open(&mut self) -> std::io::Result<PayloadReader> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}
