//! One-shot byte sources wrapped by a replay cache.

use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

/// A byte source that may only be read once, front to back.
///
/// `std::io::Read` has no notion of "bytes available without blocking", so a
/// source may carry an optional length hint instead. The hint is decremented
/// as bytes are consumed and backs [`CachingReplayStream::available`].
///
/// [`CachingReplayStream::available`]: crate::CachingReplayStream::available
pub struct ReplaySource {
    reader: Box<dyn Read + Send>,
    remaining: Option<u64>,
}

impl fmt::Debug for ReplaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplaySource")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl ReplaySource {
    /// Wraps a reader of unknown length.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            remaining: None,
        }
    }

    /// Sets the number of bytes the reader is expected to yield.
    #[must_use]
    pub fn with_len(mut self, len: u64) -> Self {
        self.remaining = Some(len);
        self
    }

    /// Wraps an in-memory buffer; the length hint is exact.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self::new(Cursor::new(data)).with_len(len)
    }

    /// Opens the file at `path`; the length hint is the file size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::new(file).with_len(len))
    }

    /// Returns the remaining length hint, `0` if unknown.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.remaining.unwrap_or(0)
    }
}

impl Read for ReplaySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = if n == 0 {
                0
            } else {
                remaining.saturating_sub(n as u64)
            };
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_tracks_consumption() {
        let mut source = ReplaySource::from_bytes(&b"helloWorld"[..]);
        assert_eq!(source.available(), 10);

        let mut buf = [0u8; 4];
        source.read_exact(&mut buf).unwrap();
        assert_eq!(source.available(), 6);

        let mut rest = Vec::new();
        source.read_to_end(&mut rest).unwrap();
        assert_eq!(source.available(), 0);
    }

    #[test]
    fn unknown_length_reports_zero() {
        let source = ReplaySource::new(io::empty());
        assert_eq!(source.available(), 0);
    }
}
