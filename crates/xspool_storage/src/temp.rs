//! Temporary file lifecycle.
//!
//! Each running instance owns one scratch directory under a shared root:
//!
//! ```text
//! <root>/
//! ├─ xspool-scratch-<pid>-<uuid>/   # live or orphaned instance directory
//! │  ├─ LOCK                        # held exclusively while the owner lives
//! │  └─ spool-000042-<uuid>.tmp     # scratch files
//! ├─ xspool-staging-<uuid>/         # instance directory being initialized
//! └─ xspool-reclaim-<uuid>/         # orphan being deleted
//! ```
//!
//! The LOCK file is the only cross-process coordination point. On startup,
//! scratch directories whose LOCK can be acquired (or that have no LOCK)
//! belong to dead processes and are reclaimed. Reclaiming renames the
//! directory first, so when several instances sweep concurrently exactly one
//! of them wins each orphan.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCRATCH_PREFIX: &str = "xspool-scratch-";
const STAGING_PREFIX: &str = "xspool-staging-";
const RECLAIM_PREFIX: &str = "xspool-reclaim-";
const LOCK_FILE: &str = "LOCK";
const FILE_PREFIX: &str = "spool-";
const FILE_SUFFIX: &str = ".tmp";

/// How long a staging directory may exist without a LOCK before sweeps
/// treat it as abandoned.
pub const STAGING_GRACE: Duration = Duration::from_secs(60);

/// What happened to one candidate directory during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The directory was orphaned and this caller deleted it.
    Reclaimed,
    /// Another live instance holds the lock.
    Live,
    /// The directory disappeared first (another sweeper won).
    Vanished,
}

/// Result of sweeping a root for orphaned scratch directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Directories reclaimed by this sweep.
    pub reclaimed: Vec<PathBuf>,
    /// Directories owned by live instances.
    pub live: Vec<PathBuf>,
    /// Directories that could not be examined.
    pub failed: Vec<PathBuf>,
}

/// Scans `root` and reclaims scratch directories left by dead instances.
///
/// Directories owned by live instances are left alone. Per-directory
/// failures are logged and recorded in [`SweepReport::failed`].
///
/// # Errors
///
/// Returns an error only if `root` itself cannot be listed.
pub fn sweep_orphans(root: &Path) -> StorageResult<SweepReport> {
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let path = entry.path();

        if name.starts_with(RECLAIM_PREFIX) {
            // Leftover from a sweeper that died mid-delete.
            if let Err(e) = fs::remove_dir_all(&path) {
                debug!(path = %path.display(), error = %e, "could not remove reclaim leftover");
            }
            continue;
        }

        let staging = name.starts_with(STAGING_PREFIX);
        if !staging && !name.starts_with(SCRATCH_PREFIX) {
            continue;
        }

        match claim_orphan(&path, staging) {
            Ok(ClaimOutcome::Reclaimed) => report.reclaimed.push(path),
            Ok(ClaimOutcome::Live) => report.live.push(path),
            Ok(ClaimOutcome::Vanished) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to examine scratch directory");
                report.failed.push(path);
            }
        }
    }

    Ok(report)
}

/// Tries to take ownership of one scratch directory and delete it.
///
/// A staging directory without a LOCK may still be mid-initialization and is
/// treated as live until it is older than [`STAGING_GRACE`].
///
/// # Errors
///
/// Returns an error if the lock file exists but cannot be opened.
pub fn claim_orphan(dir: &Path, staging: bool) -> StorageResult<ClaimOutcome> {
    claim_orphan_after(dir, staging, STAGING_GRACE)
}

/// Like [`claim_orphan`], with a custom grace period for lockless staging
/// directories.
///
/// # Errors
///
/// Same as [`claim_orphan`].
pub fn claim_orphan_after(dir: &Path, staging: bool, grace: Duration) -> StorageResult<ClaimOutcome> {
    let lock_path = dir.join(LOCK_FILE);
    match OpenOptions::new().read(true).write(true).open(&lock_path) {
        Ok(lock) => {
            if lock.try_lock_exclusive().is_err() {
                return Ok(ClaimOutcome::Live);
            }
            // Keep holding the lock until the directory is gone.
            let outcome = bury(dir);
            drop(lock);
            outcome
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if !dir.exists() {
                Ok(ClaimOutcome::Vanished)
            } else if staging && age(dir) < grace {
                Ok(ClaimOutcome::Live)
            } else {
                bury(dir)
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Time since `dir` was last modified. Unreadable metadata counts as fresh.
fn age(dir: &Path) -> Duration {
    fs::metadata(dir)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

fn bury(dir: &Path) -> StorageResult<ClaimOutcome> {
    let grave = dir.with_file_name(format!("{RECLAIM_PREFIX}{}", Uuid::new_v4().simple()));
    match fs::rename(dir, &grave) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ClaimOutcome::Vanished),
        Err(e) => return Err(e.into()),
    }
    if let Err(e) = fs::remove_dir_all(&grave) {
        warn!(path = %grave.display(), error = %e, "failed to delete reclaimed directory");
    }
    Ok(ClaimOutcome::Reclaimed)
}

/// Creates a locked scratch directory under `root`.
///
/// The directory is prepared under a staging name and renamed into place
/// only once its LOCK is held, so sweepers never see it unlocked.
fn create_scratch(root: &Path) -> StorageResult<(PathBuf, File)> {
    fs::create_dir_all(root).map_err(|e| StorageError::temp_unavailable(root, e))?;

    let staging = root.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4().simple()));
    fs::create_dir(&staging).map_err(|e| StorageError::temp_unavailable(&staging, e))?;

    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(staging.join(LOCK_FILE))
        .map_err(|e| StorageError::temp_unavailable(&staging, e))?;
    lock.try_lock_exclusive()
        .map_err(|e| StorageError::temp_unavailable(&staging, e))?;

    let dir = root.join(format!(
        "{SCRATCH_PREFIX}{}-{}",
        std::process::id(),
        Uuid::new_v4().simple()
    ));
    fs::rename(&staging, &dir).map_err(|e| StorageError::temp_unavailable(&dir, e))?;

    Ok((dir, lock))
}

#[derive(Debug)]
struct ScratchState {
    dir: PathBuf,
    lock: Option<File>,
    issued: HashSet<PathBuf>,
    closed: bool,
}

/// Issues and reclaims ephemeral files inside a private, locked scratch
/// directory.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
/// Files still outstanding at [`TempFileAuthority::shutdown`] (or drop) are
/// deleted together with the directory.
///
/// # Example
///
/// ```rust,no_run
/// use xspool_storage::TempFileAuthority;
///
/// let authority = TempFileAuthority::open_default()?;
/// let path = authority.get_temporary_file()?;
/// std::fs::write(&path, b"scratch")?;
/// authority.return_temporary_file(&path);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct TempFileAuthority {
    root: PathBuf,
    state: Mutex<ScratchState>,
    counter: AtomicU64,
}

impl TempFileAuthority {
    /// Sweeps `root` for orphans, then creates and locks a fresh scratch
    /// directory inside it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TempFileUnavailable`] if the scratch directory
    /// cannot be created or locked.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root).map_err(|e| StorageError::temp_unavailable(root, e))?;

        let report = sweep_orphans(root)?;
        if !report.reclaimed.is_empty() {
            info!(
                root = %root.display(),
                reclaimed = report.reclaimed.len(),
                "reclaimed orphaned scratch directories"
            );
        }

        let (dir, lock) = create_scratch(root)?;
        info!(dir = %dir.display(), "temporary file authority started");

        Ok(Self {
            root: root.to_path_buf(),
            state: Mutex::new(ScratchState {
                dir,
                lock: Some(lock),
                issued: HashSet::new(),
                closed: false,
            }),
            counter: AtomicU64::new(0),
        })
    }

    /// Opens an authority under the system temporary directory.
    ///
    /// # Errors
    ///
    /// Same as [`TempFileAuthority::open`].
    pub fn open_default() -> StorageResult<Self> {
        Self::open(&std::env::temp_dir())
    }

    /// Returns the root that holds all instances' scratch directories.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns this instance's current scratch directory.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.state.lock().dir.clone()
    }

    /// Returns the number of issued files not yet returned.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.lock().issued.len()
    }

    /// Creates a new, empty, uniquely named file in the scratch directory.
    ///
    /// Recreates the scratch directory first if something removed it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] after shutdown and
    /// [`StorageError::TempFileUnavailable`] if the file cannot be created.
    pub fn get_temporary_file(&self) -> StorageResult<PathBuf> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StorageError::Closed);
        }

        if !state.dir.is_dir() {
            warn!(dir = %state.dir.display(), "scratch directory vanished, recreating");
            let (dir, lock) = create_scratch(&self.root)?;
            state.dir = dir;
            state.lock = Some(lock);
        }

        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = state.dir.join(format!(
            "{FILE_PREFIX}{seq:06}-{}{FILE_SUFFIX}",
            Uuid::new_v4().simple()
        ));
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::temp_unavailable(&path, e))?;

        state.issued.insert(path.clone());
        debug!(path = %path.display(), "issued temporary file");
        Ok(path)
    }

    /// Deletes a file previously issued by this authority.
    ///
    /// Returns `true` if the file is gone. A failed delete is logged and the
    /// file is retried at shutdown; this is common on platforms that keep a
    /// memory-mapped file open until the mapping is collected.
    pub fn return_temporary_file(&self, path: &Path) -> bool {
        let mut state = self.state.lock();
        match fs::remove_file(path) {
            Ok(()) => {
                state.issued.remove(path);
                debug!(path = %path.display(), "returned temporary file");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                state.issued.remove(path);
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to delete temporary file");
                false
            }
        }
    }

    /// Deletes all outstanding files and the scratch directory, then
    /// releases the lock. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        for path in state.issued.drain() {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "unable to delete temporary file at shutdown");
                }
            }
        }
        if let Err(e) = fs::remove_dir_all(&state.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(dir = %state.dir.display(), error = %e, "unable to delete scratch directory");
            }
        }
        // Dropping the handle releases the lock.
        state.lock = None;
        info!(dir = %state.dir.display(), "temporary file authority stopped");
    }

    /// Returns `true` once [`TempFileAuthority::shutdown`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Drop for TempFileAuthority {
    fn drop(&mut self) {
        self.shutdown();
    }
}
