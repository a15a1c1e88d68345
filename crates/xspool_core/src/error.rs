//! Error types for xspool core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in xspool core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Block store, content buffer, pool or temporary file error.
    #[error("storage error: {0}")]
    Storage(#[from] xspool_storage::StorageError),

    /// Replay cache or stream error.
    #[error("replay error: {0}")]
    Replay(#[from] xspool_replay::ReplayError),

    /// Integer codec error.
    #[error("codec error: {0}")]
    Codec(#[from] xspool_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A configuration value is missing, malformed or out of range.
    #[error("invalid configuration for {key}: {message}")]
    InvalidConfig {
        /// Offending key.
        key: String,
        /// What is wrong with it.
        message: String,
    },

    /// The spool has been shut down.
    #[error("spool is shut down")]
    Closed,
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }
}
