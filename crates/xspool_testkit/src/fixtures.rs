//! Test fixtures with automatic cleanup.
//!
//! Every fixture owns a fresh temporary directory used as the scratch root,
//! so tests never share scratch directories or lock files.

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use xspool_core::{Config, Spool};
use xspool_storage::TempFileAuthority;

/// A spool whose scratch root is a private temporary directory.
pub struct TestSpool {
    /// The spool instance.
    pub spool: Spool,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestSpool {
    /// Creates a spool with the default configuration.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a spool after letting `configure` adjust the defaults. The
    /// scratch root is always overridden.
    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(Config::default()).temp_root(temp_dir.path());
        let spool = Spool::open(config).expect("Failed to open spool");
        Self {
            spool,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the scratch root.
    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }
}

impl Default for TestSpool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestSpool {
    type Target = Spool;

    fn deref(&self) -> &Self::Target {
        &self.spool
    }
}

/// A temporary file authority rooted in a private temporary directory.
pub struct TestAuthority {
    /// The shared authority.
    pub authority: Arc<TempFileAuthority>,
    _temp_dir: TempDir,
}

impl TestAuthority {
    /// Opens an authority in a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let authority =
            TempFileAuthority::open(temp_dir.path()).expect("Failed to open temp file authority");
        Self {
            authority: Arc::new(authority),
            _temp_dir: temp_dir,
        }
    }

    /// Returns the scratch root.
    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Returns a new handle to the authority.
    pub fn handle(&self) -> Arc<TempFileAuthority> {
        Arc::clone(&self.authority)
    }
}

impl Default for TestAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestAuthority {
    type Target = TempFileAuthority;

    fn deref(&self) -> &Self::Target {
        &self.authority
    }
}

/// Runs a test with a temporary spool.
///
/// # Example
///
/// ```rust
/// use xspool_testkit::with_temp_spool;
///
/// with_temp_spool(|spool| {
///     let buffer = spool.borrow_content().unwrap();
///     spool.give_back(buffer);
/// });
/// ```
pub fn with_temp_spool<F, R>(f: F) -> R
where
    F: FnOnce(&Spool) -> R,
{
    let spool = TestSpool::new();
    f(&spool)
}

/// Runs a test with a temporary spool whose buffers spill past
/// `in_memory_size` bytes.
pub fn with_threshold<F, R>(in_memory_size: u64, f: F) -> R
where
    F: FnOnce(&Spool) -> R,
{
    let spool = TestSpool::with_config(|config| config.in_memory_size(in_memory_size));
    f(&spool)
}

/// Generates `len` bytes of a deterministic, non-repeating-looking pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(131).wrapping_add(i >> 8) % 251) as u8)
        .collect()
}
