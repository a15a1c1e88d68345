//! Memory-mapped replay cache.
//!
//! The cache maps a temporary file and grows it in fixed increments. Growing
//! flushes and unmaps the current view, extends the file and maps it again;
//! the logical length is unaffected. Some platforms refuse to resize a file
//! that is still mapped, so the old view is always gone before `set_len`.

#![allow(unsafe_code)]

use crate::backend::{check_capacity, check_range, CacheBackend};
use crate::error::{ReplayError, ReplayResult};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use xspool_storage::TempFileAuthority;

/// Default growth increment: 64 MiB.
pub const DEFAULT_MMAP_INCREMENT: u64 = 64 * 1024 * 1024;

#[derive(Debug)]
struct Mapping {
    file: File,
    map: MmapMut,
}

/// A replay cache held in a memory-mapped temporary file.
#[derive(Debug)]
pub struct MmapCache {
    authority: Arc<TempFileAuthority>,
    path: PathBuf,
    mapping: Option<Mapping>,
    capacity: u64,
    increment: u64,
    length: u32,
}

impl MmapCache {
    /// Creates a cache with [`DEFAULT_MMAP_INCREMENT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be created or mapped.
    pub fn new(authority: Arc<TempFileAuthority>) -> ReplayResult<Self> {
        Self::with_increment(authority, DEFAULT_MMAP_INCREMENT)
    }

    /// Creates a cache whose capacity starts at, and grows by, `increment`
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be created or mapped.
    pub fn with_increment(authority: Arc<TempFileAuthority>, increment: u64) -> ReplayResult<Self> {
        let increment = increment.max(1);
        let path = authority.get_temporary_file()?;
        match Self::map_new(&path, increment) {
            Ok(mapping) => {
                debug!(path = %path.display(), increment, "created mmap replay cache");
                Ok(Self {
                    authority,
                    path,
                    mapping: Some(mapping),
                    capacity: increment,
                    increment,
                    length: 0,
                })
            }
            Err(e) => {
                authority.return_temporary_file(&path);
                Err(e)
            }
        }
    }

    fn map_new(path: &Path, capacity: u64) -> ReplayResult<Mapping> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.set_len(capacity)?;
        Self::map_file(file)
    }

    fn map_file(file: File) -> ReplayResult<Mapping> {
        // SAFETY: the file was issued to this cache by the temporary file
        // authority and is not shared with anything else. The mapping lives
        // in the same struct as the file and is only reachable through
        // `&mut self`, and every access is bounds-checked against `length`.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Mapping { file, map })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the mapped capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the growth increment in bytes.
    #[must_use]
    pub fn increment(&self) -> u64 {
        self.increment
    }

    fn grow(&mut self, needed: u64) -> ReplayResult<()> {
        let steps = (needed - self.capacity).div_ceil(self.increment);
        let new_capacity = self.capacity + steps * self.increment;
        let mapping = self.mapping.take().ok_or(ReplayError::StreamClosed)?;
        if let Err(e) = mapping.map.flush() {
            self.mapping = Some(mapping);
            return Err(e.into());
        }

        let Mapping { file, map } = mapping;
        drop(map);
        if let Err(e) = file.set_len(new_capacity) {
            // Restore the old view so the cached bytes stay readable.
            self.mapping = Some(Self::map_file(file)?);
            return Err(e.into());
        }
        self.mapping = Some(Self::map_file(file)?);

        debug!(
            path = %self.path.display(),
            from = self.capacity,
            to = new_capacity,
            "grew mmap replay cache"
        );
        self.capacity = new_capacity;
        Ok(())
    }
}

impl CacheBackend for MmapCache {
    fn kind(&self) -> &'static str {
        "mmap"
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn write(&mut self, data: &[u8]) -> ReplayResult<()> {
        if self.mapping.is_none() {
            return Err(ReplayError::StreamClosed);
        }
        check_capacity(self.length, data.len())?;

        let needed = u64::from(self.length) + data.len() as u64;
        if needed > self.capacity {
            self.grow(needed)?;
        }

        let start = self.length as usize;
        let mapping = self.mapping.as_mut().ok_or(ReplayError::StreamClosed)?;
        mapping.map[start..start + data.len()].copy_from_slice(data);
        self.length += data.len() as u32;
        Ok(())
    }

    fn copy_to(&mut self, offset: u32, dst: &mut [u8]) -> ReplayResult<()> {
        check_range(offset, dst.len(), self.length)?;
        let mapping = self.mapping.as_ref().ok_or(ReplayError::StreamClosed)?;
        let start = offset as usize;
        dst.copy_from_slice(&mapping.map[start..start + dst.len()]);
        Ok(())
    }

    fn invalidate(&mut self) -> ReplayResult<()> {
        let Some(Mapping { file, map }) = self.mapping.take() else {
            return Ok(());
        };
        self.length = 0;
        drop(map);
        let truncated = file.set_len(0);
        drop(file);
        self.authority.return_temporary_file(&self.path);
        truncated.map_err(|e| ReplayError::invalidation(self.kind(), e))
    }
}

impl Drop for MmapCache {
    fn drop(&mut self) {
        if let Err(e) = self.invalidate() {
            warn!(path = %self.path.display(), error = %e, "failed to release mmap replay cache");
        }
    }
}
