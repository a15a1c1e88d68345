//! Temporary-file-backed replay cache.

use crate::backend::{check_capacity, check_range, CacheBackend};
use crate::error::{ReplayError, ReplayResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use xspool_storage::TempFileAuthority;

/// A replay cache stored in an append-only temporary file.
///
/// Every write seeks to the logical end before appending, so interleaved
/// reads never move the append position.
#[derive(Debug)]
pub struct FileCache {
    authority: Arc<TempFileAuthority>,
    path: PathBuf,
    file: Option<File>,
    length: u32,
}

impl FileCache {
    /// Creates an empty cache in a file issued by `authority`.
    ///
    /// # Errors
    ///
    /// Returns an error if no temporary file can be created or opened.
    pub fn new(authority: Arc<TempFileAuthority>) -> ReplayResult<Self> {
        let path = authority.get_temporary_file()?;
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) => {
                authority.return_temporary_file(&path);
                return Err(e.into());
            }
        };
        debug!(path = %path.display(), "created file replay cache");
        Ok(Self {
            authority,
            path,
            file: Some(file),
            length: 0,
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> ReplayResult<&mut File> {
        self.file.as_mut().ok_or(ReplayError::StreamClosed)
    }
}

impl CacheBackend for FileCache {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn write(&mut self, data: &[u8]) -> ReplayResult<()> {
        check_capacity(self.length, data.len())?;
        let end = u64::from(self.length);
        let file = self.file()?;
        file.seek(SeekFrom::Start(end))?;
        file.write_all(data)?;
        self.length += data.len() as u32;
        Ok(())
    }

    fn copy_to(&mut self, offset: u32, dst: &mut [u8]) -> ReplayResult<()> {
        check_range(offset, dst.len(), self.length)?;
        if dst.is_empty() {
            return Ok(());
        }
        let file = self.file()?;
        file.seek(SeekFrom::Start(u64::from(offset)))?;
        file.read_exact(dst)?;
        Ok(())
    }

    fn invalidate(&mut self) -> ReplayResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        self.length = 0;
        let truncated = file.set_len(0);
        drop(file);
        self.authority.return_temporary_file(&self.path);
        truncated.map_err(|e| ReplayError::invalidation(self.kind(), e))
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        if let Err(e) = self.invalidate() {
            warn!(path = %self.path.display(), error = %e, "failed to release file replay cache");
        }
    }
}
