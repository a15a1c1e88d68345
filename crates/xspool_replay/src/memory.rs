//! Heap-backed replay cache.

use crate::backend::{check_capacity, check_range, CacheBackend};
use crate::error::{ReplayError, ReplayResult};

/// A replay cache that keeps every byte in a growable buffer.
///
/// # Example
///
/// ```rust
/// use xspool_replay::{CacheBackend, MemoryCache};
///
/// let mut cache = MemoryCache::new();
/// cache.write(b"hello").unwrap();
/// assert_eq!(cache.get(1).unwrap(), b'e');
/// ```
#[derive(Debug, Default)]
pub struct MemoryCache {
    data: Vec<u8>,
    invalidated: bool,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCache {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn length(&self) -> u32 {
        self.data.len() as u32
    }

    fn write(&mut self, data: &[u8]) -> ReplayResult<()> {
        if self.invalidated {
            return Err(ReplayError::StreamClosed);
        }
        check_capacity(self.length(), data.len())?;
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn copy_to(&mut self, offset: u32, dst: &mut [u8]) -> ReplayResult<()> {
        check_range(offset, dst.len(), self.length())?;
        let start = offset as usize;
        dst.copy_from_slice(&self.data[start..start + dst.len()]);
        Ok(())
    }

    fn invalidate(&mut self) -> ReplayResult<()> {
        self.invalidated = true;
        self.data = Vec::new();
        Ok(())
    }
}
