//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write would grow a block store past its block ceiling.
    #[error("block store capacity exceeded: {required} blocks required, limit {limit}")]
    CapacityExceeded {
        /// Blocks needed to hold the write.
        required: u64,
        /// Configured block ceiling.
        limit: u64,
    },

    /// The scratch directory is missing and cannot be recreated, or a file
    /// cannot be created inside it.
    #[error("temporary file unavailable in {path}: {source}")]
    TempFileUnavailable {
        /// Directory or file that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The pool is configured to fail rather than allocate past its limit.
    #[error("content pool exhausted: {active} of {max_total} buffers in use")]
    PoolExhausted {
        /// Buffers currently borrowed.
        active: usize,
        /// Configured pool limit.
        max_total: usize,
    },

    /// The operation is not supported by this implementation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The temporary file authority has been shut down.
    #[error("temporary file authority is closed")]
    Closed,
}

impl StorageError {
    /// Creates a temp-file-unavailable error.
    pub fn temp_unavailable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::TempFileUnavailable {
            path: path.into(),
            source,
        }
    }
}

impl From<StorageError> for io::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => e,
            StorageError::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
