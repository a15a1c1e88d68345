//! Diagnostics registry of live replay caches.

use crate::cache::ReplayCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct CacheKey {
    created_nanos: u128,
    id: u64,
}

impl CacheKey {
    fn of(cache: &ReplayCache) -> Self {
        let created_nanos = cache
            .created()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        Self {
            created_nanos,
            id: cache.id(),
        }
    }
}

/// State of one live cache at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    /// Process-unique cache id.
    pub id: u64,
    /// Backend kind.
    pub kind: &'static str,
    /// Creation time.
    pub created: SystemTime,
    /// Cached bytes.
    pub length: u32,
    /// Live shared references.
    pub shared_refs: u32,
    /// Whether the source has been closed.
    pub source_closed: bool,
}

/// Tracks every monitored [`ReplayCache`] until it is invalidated.
///
/// Entries are ordered by creation time. The monitor holds weak references,
/// so it never keeps a cache alive.
#[derive(Debug, Default)]
pub struct CacheMonitor {
    caches: Mutex<BTreeMap<CacheKey, Weak<ReplayCache>>>,
}

impl CacheMonitor {
    /// Creates an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, cache: &Arc<ReplayCache>) {
        self.caches
            .lock()
            .insert(CacheKey::of(cache), Arc::downgrade(cache));
    }

    pub(crate) fn deregister(&self, cache: &ReplayCache) {
        self.caches.lock().remove(&CacheKey::of(cache));
    }

    /// Returns the number of tracked caches, including ones dropped without
    /// invalidation that have not been pruned yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.caches.lock().len()
    }

    /// Returns `true` if no cache is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caches.lock().is_empty()
    }

    /// Returns the live caches, oldest first, pruning dropped ones.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CacheSnapshot> {
        let live: Vec<Arc<ReplayCache>> = {
            let mut caches = self.caches.lock();
            caches.retain(|_, cache| cache.strong_count() > 0);
            caches.values().filter_map(Weak::upgrade).collect()
        };
        live.iter()
            .map(|cache| CacheSnapshot {
                id: cache.id(),
                kind: cache.kind(),
                created: cache.created(),
                length: cache.length(),
                shared_refs: cache.shared_refs(),
                source_closed: cache.is_source_closed(),
            })
            .collect()
    }

    /// Renders [`CacheMonitor::snapshot`] as a human-readable report.
    #[must_use]
    pub fn dump(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!("{} live replay cache(s)\n", snapshot.len());
        for entry in &snapshot {
            let age = entry.created.elapsed().unwrap_or_default();
            let _ = writeln!(
                out,
                "  #{:<6} {:<6} length={:<10} refs={:<3} source={} age={:.3}s",
                entry.id,
                entry.kind,
                entry.length,
                entry.shared_refs,
                if entry.source_closed { "closed" } else { "open" },
                age.as_secs_f64()
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;
    use crate::source::ReplaySource;

    fn monitored(monitor: &Arc<CacheMonitor>, data: &'static [u8]) -> Arc<ReplayCache> {
        ReplayCache::monitored(
            Box::new(MemoryCache::new()),
            ReplaySource::from_bytes(data),
            monitor,
        )
    }

    #[test]
    fn tracks_until_invalidated() {
        let monitor = Arc::new(CacheMonitor::new());
        let first = monitored(&monitor, b"one");
        let second = monitored(&monitor, b"two");
        assert_eq!(monitor.len(), 2);

        let ids: Vec<u64> = monitor.snapshot().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);

        first.invalidate().unwrap();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, second.id());
        assert_eq!(snapshot[0].kind, "memory");
    }

    #[test]
    fn dropped_caches_are_pruned() {
        let monitor = Arc::new(CacheMonitor::new());
        drop(monitored(&monitor, b"gone"));
        assert_eq!(monitor.len(), 1);
        assert!(monitor.snapshot().is_empty());
        assert!(monitor.is_empty());
    }

    #[test]
    fn dump_lists_caches() {
        let monitor = Arc::new(CacheMonitor::new());
        let cache = monitored(&monitor, b"abc");
        cache.lock().unwrap().skip_source(2).unwrap();

        let report = monitor.dump();
        assert!(report.starts_with("1 live replay cache(s)"));
        assert!(report.contains("length=2"));
        assert!(report.contains("source=open"));
    }
}
