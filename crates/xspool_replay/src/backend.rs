//! Replay cache backend trait.

use crate::error::{ReplayError, ReplayResult};
use std::fmt;
use std::io;

/// Largest number of bytes a single cache may hold.
pub const MAX_CACHE_LEN: u32 = i32::MAX as u32;

/// Append-only storage for bytes pulled from a replay source.
///
/// A backend only stores bytes; it never reads the source itself. The
/// owning [`ReplayCache`](crate::ReplayCache) serializes all access, so
/// implementations take `&mut self` and need not be `Sync`.
///
/// # Invariants
///
/// - `length()` grows by exactly `data.len()` on every successful `write`
/// - bytes at offsets below `length()` never change
/// - after `invalidate()` the backend holds no memory, file or mapping, and
///   further writes fail with [`ReplayError::StreamClosed`]
pub trait CacheBackend: Send + fmt::Debug {
    /// Short name of the backend kind, such as `"memory"`.
    fn kind(&self) -> &'static str;

    /// Returns the number of cached bytes.
    fn length(&self) -> u32;

    /// Appends `data` at the logical end.
    fn write(&mut self, data: &[u8]) -> ReplayResult<()>;

    /// Copies `dst.len()` cached bytes starting at `offset` into `dst`.
    fn copy_to(&mut self, offset: u32, dst: &mut [u8]) -> ReplayResult<()>;

    /// Releases memory, files and mappings. Idempotent.
    fn invalidate(&mut self) -> ReplayResult<()>;

    /// Returns the cached byte at `offset`.
    fn get(&mut self, offset: u32) -> ReplayResult<u8> {
        let mut byte = [0u8; 1];
        self.copy_to(offset, &mut byte)?;
        Ok(byte[0])
    }
}

/// Fails unless `offset..offset + len` lies within `length` cached bytes.
pub(crate) fn check_range(offset: u32, len: usize, length: u32) -> ReplayResult<()> {
    let end = u64::from(offset) + len as u64;
    if end > u64::from(length) {
        return Err(ReplayError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("cache read {offset}..{end} past cached length {length}"),
        )));
    }
    Ok(())
}

/// Fails if appending `len` bytes would pass [`MAX_CACHE_LEN`].
pub(crate) fn check_capacity(length: u32, len: usize) -> ReplayResult<()> {
    if u64::from(length) + len as u64 > u64::from(MAX_CACHE_LEN) {
        return Err(ReplayError::CacheFull {
            length: u64::from(length),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_checks() {
        assert!(check_range(0, 0, 0).is_ok());
        assert!(check_range(2, 3, 5).is_ok());
        assert!(check_range(3, 3, 5).is_err());
        assert!(check_range(u32::MAX, 1, u32::MAX).is_err());
    }

    #[test]
    fn capacity_checks() {
        assert!(check_capacity(0, 10).is_ok());
        assert!(check_capacity(MAX_CACHE_LEN - 1, 1).is_ok());
        assert!(matches!(
            check_capacity(MAX_CACHE_LEN, 1),
            Err(ReplayError::CacheFull { .. })
        ));
    }
}
