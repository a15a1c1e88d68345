//! Error types for replay caches and streams.

use std::io;
use thiserror::Error;
use xspool_storage::StorageError;

/// Result type for replay operations.
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Errors that can occur while caching or replaying a source.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// An I/O error from the source or a cache backing file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A temporary file could not be obtained.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The source was closed or the cache invalidated.
    #[error("stream is closed")]
    StreamClosed,

    /// Releasing a cache's backing file or mapping failed.
    #[error("failed to invalidate {kind} cache: {source}")]
    CacheInvalidation {
        /// Backend kind.
        kind: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A negative skip was requested.
    #[error("cannot skip a negative number of bytes: {0}")]
    SkipBounds(i64),

    /// The cache holds the maximum number of bytes.
    #[error("replay cache full at {length} bytes")]
    CacheFull {
        /// Bytes cached.
        length: u64,
    },

    /// No backend is registered under the requested name.
    #[error("unknown replay cache kind: {0}")]
    UnknownCacheKind(String),

    /// More shared references were released than acquired.
    #[error("shared reference count would drop below zero")]
    SharedRefUnderflow,
}

impl ReplayError {
    /// Creates a cache invalidation error.
    pub fn invalidation(kind: &'static str, source: io::Error) -> Self {
        Self::CacheInvalidation { kind, source }
    }
}

impl From<ReplayError> for io::Error {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::Io(e) => e,
            ReplayError::Storage(e) => e.into(),
            ReplayError::SkipBounds(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
