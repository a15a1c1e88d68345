//! Bounded pool of reusable content buffers.

use crate::content::VirtualContentBuffer;
use crate::error::{StorageError, StorageResult};
use crate::temp::TempFileAuthority;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What [`ContentBufferPool::borrow`] does when `max_total` buffers are out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustedAction {
    /// Hand out a fresh buffer anyway.
    #[default]
    Allocate,
    /// Refuse with [`StorageError::PoolExhausted`].
    Fail,
}

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// In-memory budget of every buffer the pool creates.
    pub in_memory_size: u64,
    /// Buffers that may be borrowed at once before `exhausted` applies.
    pub max_total: usize,
    /// Idle buffers kept for reuse; returns beyond this are dropped.
    pub max_idle: usize,
    /// Behavior once `max_total` is reached.
    pub exhausted: ExhaustedAction,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            in_memory_size: 4 * 1024 * 1024,
            max_total: 16,
            max_idle: 8,
            exhausted: ExhaustedAction::Allocate,
        }
    }
}

impl PoolConfig {
    /// Sets the per-buffer in-memory budget.
    #[must_use]
    pub const fn in_memory_size(mut self, bytes: u64) -> Self {
        self.in_memory_size = bytes;
        self
    }

    /// Sets the borrow limit.
    #[must_use]
    pub const fn max_total(mut self, n: usize) -> Self {
        self.max_total = n;
        self
    }

    /// Sets the idle limit.
    #[must_use]
    pub const fn max_idle(mut self, n: usize) -> Self {
        self.max_idle = n;
        self
    }

    /// Sets the exhausted action.
    #[must_use]
    pub const fn exhausted(mut self, action: ExhaustedAction) -> Self {
        self.exhausted = action;
        self
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently borrowed.
    pub active: usize,
    /// Buffers waiting for reuse.
    pub idle: usize,
    /// Buffers created since the pool was built.
    pub created: u64,
    /// Borrows served from the idle list.
    pub reused: u64,
    /// Returned buffers dropped because the idle list was full.
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<VirtualContentBuffer>,
    active: usize,
}

/// Hands out [`VirtualContentBuffer`]s and takes them back for reuse.
///
/// Returned buffers are closed before they go back on the idle list, so a
/// borrower always starts from empty content.
#[derive(Debug)]
pub struct ContentBufferPool {
    config: PoolConfig,
    authority: Arc<TempFileAuthority>,
    state: Mutex<PoolState>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl ContentBufferPool {
    /// Creates an empty pool whose buffers spill through `authority`.
    #[must_use]
    pub fn new(authority: Arc<TempFileAuthority>, config: PoolConfig) -> Self {
        Self {
            config,
            authority,
            state: Mutex::new(PoolState::default()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Borrows a buffer, reusing an idle one when available.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PoolExhausted`] when `max_total` buffers are
    /// out and the pool is configured with [`ExhaustedAction::Fail`].
    #[allow(clippy::should_implement_trait)]
    pub fn borrow(&self) -> StorageResult<VirtualContentBuffer> {
        let mut state = self.state.lock();
        if state.active >= self.config.max_total {
            match self.config.exhausted {
                ExhaustedAction::Fail => {
                    return Err(StorageError::PoolExhausted {
                        active: state.active,
                        max_total: self.config.max_total,
                    });
                }
                ExhaustedAction::Allocate => {
                    debug!(active = state.active, "content pool over limit, allocating");
                }
            }
        }
        state.active += 1;

        if let Some(buffer) = state.idle.pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(buffer);
        }
        drop(state);

        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(VirtualContentBuffer::new(
            Arc::clone(&self.authority),
            self.config.in_memory_size,
        ))
    }

    /// Closes `buffer` and keeps it for reuse if the idle list has room.
    ///
    /// A buffer that an open writer still refers to is dropped instead, so
    /// late writes never reach the next borrower.
    pub fn give_back(&self, buffer: VirtualContentBuffer) {
        buffer.close();

        let mut state = self.state.lock();
        match state.active.checked_sub(1) {
            Some(active) => state.active = active,
            None => warn!("content buffer returned to a pool that never lent it"),
        }
        if !buffer.is_exclusive() {
            debug!("content buffer returned with a live writer, discarding");
            self.discarded.fetch_add(1, Ordering::Relaxed);
        } else if state.idle.len() < self.config.max_idle {
            state.idle.push(buffer);
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drops every idle buffer.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut self.state.lock().idle);
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "cleared idle content buffers");
        }
    }

    /// Returns current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
