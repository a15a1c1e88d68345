//! Spool activity counters.
//!
//! ```rust,no_run
//! use xspool_core::{Config, Spool};
//!
//! let spool = Spool::open(Config::default())?;
//! let buffer = spool.borrow_content()?;
//! spool.give_back(buffer);
//!
//! let stats = spool.stats();
//! println!("borrowed {} returned {}", stats.buffers_borrowed, stats.buffers_returned);
//! # Ok::<(), xspool_core::CoreError>(())
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by [`Spool`](crate::Spool) operations.
#[derive(Debug, Default)]
pub struct SpoolStats {
    buffers_borrowed: AtomicU64,
    buffers_returned: AtomicU64,
    temp_files_issued: AtomicU64,
    temp_files_returned: AtomicU64,
    replay_caches: AtomicU64,
    replay_streams: AtomicU64,
    errors: AtomicU64,
}

impl SpoolStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_borrow(&self) {
        self.buffers_borrowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_return(&self) {
        self.buffers_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_temp_issued(&self) {
        self.temp_files_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_temp_returned(&self) {
        self.temp_files_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replay_cache(&self) {
        self.replay_caches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replay_stream(&self) {
        self.replay_streams.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            buffers_borrowed: self.buffers_borrowed.load(Ordering::Relaxed),
            buffers_returned: self.buffers_returned.load(Ordering::Relaxed),
            temp_files_issued: self.temp_files_issued.load(Ordering::Relaxed),
            temp_files_returned: self.temp_files_returned.load(Ordering::Relaxed),
            replay_caches: self.replay_caches.load(Ordering::Relaxed),
            replay_streams: self.replay_streams.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`SpoolStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Content buffers handed out by the pool.
    pub buffers_borrowed: u64,
    /// Content buffers given back to the pool.
    pub buffers_returned: u64,
    /// Temporary files issued directly through the spool.
    pub temp_files_issued: u64,
    /// Temporary files returned directly through the spool.
    pub temp_files_returned: u64,
    /// Replay caches created.
    pub replay_caches: u64,
    /// Replay stream handles opened through the spool, including those
    /// from `Spool::share_stream`.
    pub replay_streams: u64,
    /// Failed spool operations.
    pub errors: u64,
}
