//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding compact integers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended in the middle of a value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A varint carried more groups than the target width can hold.
    #[error("varint overflows {bits}-bit integer")]
    Overflow {
        /// Width of the integer being decoded.
        bits: u32,
    },

    /// A decoded string was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A length prefix does not fit in memory or in the remaining input.
    #[error("length prefix too large: {len} (remaining {remaining})")]
    LengthTooLarge {
        /// The decoded length prefix.
        len: u64,
        /// Bytes remaining in the input.
        remaining: usize,
    },
}

impl CodecError {
    /// Create an overflow error for a decode of the given width.
    pub fn overflow(bits: u32) -> Self {
        Self::Overflow { bits }
    }
}
