//! Shared replay cache: a backend plus the source feeding it.

use crate::backend::{CacheBackend, MAX_CACHE_LEN};
use crate::error::{ReplayError, ReplayResult};
use crate::monitor::CacheMonitor;
use crate::source::ReplaySource;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::debug;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

const SKIP_CHUNK: usize = 8 * 1024;

struct Inner {
    backend: Box<dyn CacheBackend>,
    source: Option<ReplaySource>,
    src_offset: u64,
}

/// Bytes pulled from a one-shot source, kept for replay by any number of
/// [`CachingReplayStream`](crate::CachingReplayStream) handles.
///
/// The cache owns its source. Reading through the cache appends whatever the
/// source yields, so later readers can replay it. The cache is invalidated
/// (source closed, backend released, monitor entry removed) when its shared
/// reference count returns to zero.
pub struct ReplayCache {
    id: u64,
    kind: &'static str,
    created: SystemTime,
    inner: Mutex<Inner>,
    length: AtomicU32,
    source_closed: AtomicBool,
    invalidated: AtomicBool,
    shared_refs: AtomicU32,
    monitor: Option<Weak<CacheMonitor>>,
}

impl fmt::Debug for ReplayCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayCache")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("length", &self.length())
            .field("shared_refs", &self.shared_refs())
            .field("source_closed", &self.is_source_closed())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

impl ReplayCache {
    /// Creates an unmonitored cache over `source`.
    pub fn new(backend: Box<dyn CacheBackend>, source: ReplaySource) -> Arc<Self> {
        Arc::new(Self::build(backend, source, None))
    }

    /// Creates a cache over `source` and registers it with `monitor`.
    pub fn monitored(
        backend: Box<dyn CacheBackend>,
        source: ReplaySource,
        monitor: &Arc<CacheMonitor>,
    ) -> Arc<Self> {
        let cache = Arc::new(Self::build(backend, source, Some(Arc::downgrade(monitor))));
        monitor.register(&cache);
        cache
    }

    fn build(
        backend: Box<dyn CacheBackend>,
        source: ReplaySource,
        monitor: Option<Weak<CacheMonitor>>,
    ) -> Self {
        let id = NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed);
        let kind = backend.kind();
        debug!(id, kind, "created replay cache");
        Self {
            id,
            kind,
            created: SystemTime::now(),
            length: AtomicU32::new(backend.length()),
            inner: Mutex::new(Inner {
                backend,
                source: Some(source),
                src_offset: 0,
            }),
            source_closed: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
            shared_refs: AtomicU32::new(0),
            monitor,
        }
    }

    /// Returns the process-unique cache id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the backend kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Returns the creation time.
    #[must_use]
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Returns the number of cached bytes.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.length.load(Ordering::Acquire)
    }

    /// Returns the number of live shared references.
    #[must_use]
    pub fn shared_refs(&self) -> u32 {
        self.shared_refs.load(Ordering::Acquire)
    }

    /// Returns `true` once the source has been closed.
    #[must_use]
    pub fn is_source_closed(&self) -> bool {
        self.source_closed.load(Ordering::Acquire)
    }

    /// Returns `true` once the backend has been released.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Acquires the source lock.
    ///
    /// Every decision that depends on the cached length and the source must
    /// be made under one guard.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::StreamClosed`] if the source is closed.
    pub fn lock(&self) -> ReplayResult<CacheGuard<'_>> {
        let inner = self.inner.lock();
        if inner.source.is_none() {
            return Err(ReplayError::StreamClosed);
        }
        Ok(CacheGuard { cache: self, inner })
    }

    /// Adds a shared reference and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::StreamClosed`] if the cache was invalidated.
    pub fn increment_shared_refs(&self) -> ReplayResult<u32> {
        let mut current = self.shared_refs.load(Ordering::Acquire);
        loop {
            if self.is_invalidated() {
                return Err(ReplayError::StreamClosed);
            }
            match self.shared_refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Releases a shared reference and returns the new count.
    ///
    /// The cache is invalidated when the count reaches zero.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::SharedRefUnderflow`] if no reference is held,
    /// or the invalidation error when releasing the last one.
    pub fn decrement_shared_refs(&self) -> ReplayResult<u32> {
        let mut current = self.shared_refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(ReplayError::SharedRefUnderflow);
            }
            match self.shared_refs.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let remaining = current - 1;
        if remaining == 0 {
            self.invalidate()?;
        }
        Ok(remaining)
    }

    /// Closes the source. Every handle fails with
    /// [`ReplayError::StreamClosed`] afterwards, but cached bytes are kept
    /// until invalidation.
    pub fn close_source(&self) {
        let mut inner = self.inner.lock();
        if inner.source.take().is_some() {
            self.source_closed.store(true, Ordering::Release);
            debug!(id = self.id, "closed replay source");
        }
    }

    /// Closes the source and releases the backend. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::CacheInvalidation`] if the backend could not be
    /// released cleanly.
    pub fn invalidate(&self) -> ReplayResult<()> {
        if self.invalidated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = {
            let mut inner = self.inner.lock();
            inner.source = None;
            self.source_closed.store(true, Ordering::Release);
            inner.backend.invalidate()
        };
        self.length.store(0, Ordering::Release);

        if let Some(monitor) = self.monitor.as_ref().and_then(Weak::upgrade) {
            monitor.deregister(self);
        }
        debug!(id = self.id, kind = self.kind, "invalidated replay cache");
        result
    }
}

/// Exclusive access to a cache's backend and source.
///
/// Dropping the guard releases the source lock.
pub struct CacheGuard<'a> {
    cache: &'a ReplayCache,
    inner: MutexGuard<'a, Inner>,
}

impl fmt::Debug for CacheGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheGuard")
            .field("id", &self.cache.id)
            .field("length", &self.length())
            .field("src_offset", &self.src_offset())
            .finish()
    }
}

impl CacheGuard<'_> {
    /// Returns the number of cached bytes.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.inner.backend.length()
    }

    /// Returns how many bytes have been pulled from the source.
    #[must_use]
    pub fn src_offset(&self) -> u64 {
        self.inner.src_offset
    }

    /// Returns the source's remaining length hint.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.inner.source.as_ref().map_or(0, ReplaySource::available)
    }

    /// Copies cached bytes starting at `offset` into `dst`.
    ///
    /// # Errors
    ///
    /// Fails if the range is not fully cached.
    pub fn copy_to(&mut self, offset: u32, dst: &mut [u8]) -> ReplayResult<()> {
        self.inner.backend.copy_to(offset, dst)
    }

    /// Returns the cached byte at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if `offset` is not cached.
    pub fn get(&mut self, offset: u32) -> ReplayResult<u8> {
        self.inner.backend.get(offset)
    }

    /// Performs one read on the source and appends the result to the cache.
    ///
    /// Returns the number of bytes read; `0` means end of source.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::CacheFull`] if the cache cannot take another
    /// byte, or the source or backend error.
    pub fn read_through(&mut self, buf: &mut [u8]) -> ReplayResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let length = self.inner.backend.length();
        let room = (MAX_CACHE_LEN - length) as usize;
        if room == 0 {
            return Err(ReplayError::CacheFull {
                length: u64::from(length),
            });
        }
        let want = buf.len().min(room);

        let inner = &mut *self.inner;
        let source = inner.source.as_mut().ok_or(ReplayError::StreamClosed)?;
        let n = source.read(&mut buf[..want])?;
        if n > 0 {
            inner.backend.write(&buf[..n])?;
            inner.src_offset += n as u64;
            self.cache
                .length
                .store(inner.backend.length(), Ordering::Release);
        }
        Ok(n)
    }

    /// Pulls up to `n` bytes through the cache without returning them.
    ///
    /// Returns the number of bytes pulled, less than `n` only at end of
    /// source.
    ///
    /// # Errors
    ///
    /// Same as [`CacheGuard::read_through`].
    pub fn skip_source(&mut self, n: u64) -> ReplayResult<u64> {
        let mut scratch = vec![0u8; SKIP_CHUNK.min(n as usize)];
        let mut skipped = 0u64;
        while skipped < n {
            let want = (n - skipped).min(scratch.len() as u64) as usize;
            let read = self.read_through(&mut scratch[..want])?;
            if read == 0 {
                break;
            }
            skipped += read as u64;
        }
        Ok(skipped)
    }
}
