//! The spool: one place that owns the process-wide spooling services.

use crate::config::{Config, KEY_CACHE_CLASS};
use crate::error::{CoreError, CoreResult};
use crate::stats::{SpoolStats, StatsSnapshot};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use xspool_replay::{
    CacheContext, CacheMonitor, CacheRegistry, CachingReplayStream, ReplayCache, ReplaySource,
};
use xspool_storage::{ContentBufferPool, PoolStats, TempFileAuthority, VirtualContentBuffer};

/// Owner of the temporary file authority, the content buffer pool and the
/// replay cache registry and monitor.
///
/// Construct one per process (or one per test, pointed at its own scratch
/// root) and share it. [`Spool::shutdown`], also run on drop, deletes every
/// scratch file and releases the scratch directory lock.
///
/// # Example
///
/// ```rust,no_run
/// use std::io::{Read, Write};
/// use xspool_core::{Config, Spool};
/// use xspool_replay::ReplaySource;
///
/// let spool = Spool::open(Config::default().in_memory_size(64 * 1024))?;
///
/// let buffer = spool.borrow_content()?;
/// buffer.new_writer()?.write_all(b"<doc/>")?;
/// spool.give_back(buffer);
///
/// let mut stream = spool.replay(ReplaySource::from_bytes(&b"payload"[..]))?;
/// let mut text = String::new();
/// stream.read_to_string(&mut text)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Spool {
    config: Config,
    authority: Arc<TempFileAuthority>,
    pool: ContentBufferPool,
    registry: CacheRegistry,
    context: CacheContext,
    monitor: Arc<CacheMonitor>,
    stats: SpoolStats,
    closed: AtomicBool,
}

impl Spool {
    /// Opens a spool with the built-in replay cache kinds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the configuration is invalid
    /// or names an unknown cache kind, and a storage error if the scratch
    /// directory cannot be created.
    pub fn open(config: Config) -> CoreResult<Self> {
        Self::with_registry(config, CacheRegistry::new())
    }

    /// Opens a spool that resolves cache kinds through `registry`.
    ///
    /// # Errors
    ///
    /// Same as [`Spool::open`].
    pub fn with_registry(config: Config, registry: CacheRegistry) -> CoreResult<Self> {
        config.validate()?;
        if !registry.contains(&config.cache_kind) {
            return Err(CoreError::invalid_config(
                KEY_CACHE_CLASS,
                format!("unknown replay cache kind {:?}", config.cache_kind),
            ));
        }

        let root = config.resolved_temp_root();
        let authority = Arc::new(TempFileAuthority::open(&root)?);
        let pool = ContentBufferPool::new(Arc::clone(&authority), config.pool_config());
        let context =
            CacheContext::new(Arc::clone(&authority)).with_mmap_increment(config.mmap_increment);

        info!(
            root = %root.display(),
            in_memory_size = config.in_memory_size,
            cache = %config.cache_kind,
            "spool opened"
        );

        Ok(Self {
            config,
            authority,
            pool,
            registry,
            context,
            monitor: Arc::new(CacheMonitor::new()),
            stats: SpoolStats::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the temporary file authority.
    #[must_use]
    pub fn authority(&self) -> &Arc<TempFileAuthority> {
        &self.authority
    }

    /// Returns the replay cache registry.
    #[must_use]
    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// Returns the live replay cache monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<CacheMonitor> {
        &self.monitor
    }

    /// Returns activity counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns content pool counters.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Returns `true` once [`Spool::shutdown`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::Closed);
        }
        Ok(())
    }

    fn track<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if result.is_err() {
            self.stats.record_error();
        }
        result
    }

    /// Borrows an empty content buffer from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after shutdown, or the pool error.
    pub fn borrow_content(&self) -> CoreResult<VirtualContentBuffer> {
        self.ensure_open()?;
        let buffer = self.track(self.pool.borrow().map_err(CoreError::from))?;
        self.stats.record_borrow();
        Ok(buffer)
    }

    /// Closes `buffer` and returns it to the pool.
    pub fn give_back(&self, buffer: VirtualContentBuffer) {
        self.pool.give_back(buffer);
        self.stats.record_return();
    }

    /// Creates a scratch file owned by the caller until returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after shutdown, or the storage error.
    pub fn temporary_file(&self) -> CoreResult<PathBuf> {
        self.ensure_open()?;
        let path = self.track(
            self.authority
                .get_temporary_file()
                .map_err(CoreError::from),
        )?;
        self.stats.record_temp_issued();
        Ok(path)
    }

    /// Deletes a scratch file obtained from [`Spool::temporary_file`].
    ///
    /// Returns `false` if the delete failed; the file is retried at
    /// shutdown.
    pub fn return_temporary_file(&self, path: &Path) -> bool {
        let deleted = self.authority.return_temporary_file(path);
        self.stats.record_temp_returned();
        deleted
    }

    /// Wraps `source` in a monitored replay cache of the configured kind.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after shutdown, or the backend error.
    pub fn replay_cache(&self, source: ReplaySource) -> CoreResult<Arc<ReplayCache>> {
        self.replay_cache_of(&self.config.cache_kind, source)
    }

    /// Wraps `source` in a monitored replay cache of kind `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after shutdown, or the registry or
    /// backend error.
    pub fn replay_cache_of(&self, kind: &str, source: ReplaySource) -> CoreResult<Arc<ReplayCache>> {
        self.ensure_open()?;
        let backend = self.track(
            self.registry
                .create(kind, &self.context)
                .map_err(CoreError::from),
        )?;
        let cache = ReplayCache::monitored(backend, source, &self.monitor);
        self.stats.record_replay_cache();
        debug!(id = cache.id(), kind = cache.kind(), "spool created replay cache");
        Ok(cache)
    }

    /// Wraps `source` in a replay cache of the configured kind and opens the
    /// first stream over it.
    ///
    /// # Errors
    ///
    /// Same as [`Spool::replay_cache`].
    pub fn replay(&self, source: ReplaySource) -> CoreResult<CachingReplayStream> {
        let cache = self.replay_cache(source)?;
        self.open_stream(cache)
    }

    /// Opens another stream over an existing cache.
    ///
    /// # Errors
    ///
    /// Returns a replay error if the cache was invalidated.
    pub fn open_stream(&self, cache: Arc<ReplayCache>) -> CoreResult<CachingReplayStream> {
        let stream = self.track(CachingReplayStream::new(cache).map_err(CoreError::from))?;
        self.stats.record_replay_stream();
        Ok(stream)
    }

    /// Opens another handle over `stream`'s cache, starting at offset 0.
    ///
    /// Same as [`CachingReplayStream::share`], but counted in
    /// [`StatsSnapshot::replay_streams`].
    ///
    /// # Errors
    ///
    /// Returns a replay error if the cache was invalidated.
    pub fn share_stream(&self, stream: &CachingReplayStream) -> CoreResult<CachingReplayStream> {
        let shared = self.track(stream.share().map_err(CoreError::from))?;
        self.stats.record_replay_stream();
        Ok(shared)
    }

    /// Drops idle buffers, deletes outstanding scratch files and releases
    /// the scratch directory. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.clear();
        let live = self.monitor.len();
        if live > 0 {
            debug!(live, "replay caches still registered at shutdown");
        }
        self.authority.shutdown();
        info!("spool shut down");
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
