//! Name → constructor map for replay cache backends.

use crate::backend::CacheBackend;
use crate::error::{ReplayError, ReplayResult};
use crate::file::FileCache;
use crate::memory::MemoryCache;
use crate::mmap::{MmapCache, DEFAULT_MMAP_INCREMENT};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use xspool_storage::TempFileAuthority;

/// Resources handed to a backend constructor.
#[derive(Debug, Clone)]
pub struct CacheContext {
    /// Source of backing files.
    pub authority: Arc<TempFileAuthority>,
    /// Growth increment for memory-mapped caches.
    pub mmap_increment: u64,
}

impl CacheContext {
    /// Creates a context with the default mmap increment.
    #[must_use]
    pub fn new(authority: Arc<TempFileAuthority>) -> Self {
        Self {
            authority,
            mmap_increment: DEFAULT_MMAP_INCREMENT,
        }
    }

    /// Sets the mmap growth increment.
    #[must_use]
    pub fn with_mmap_increment(mut self, increment: u64) -> Self {
        self.mmap_increment = increment;
        self
    }
}

/// Builds a fresh backend.
pub type CacheConstructor =
    Arc<dyn Fn(&CacheContext) -> ReplayResult<Box<dyn CacheBackend>> + Send + Sync>;

/// Registry of backend constructors keyed by kind name.
///
/// The built-in kinds are `memory`, `file` and `mmap`. Lookups also accept
/// the long class-style names `MemoryFilterInputStreamCache`,
/// `FileFilterInputStreamCache` and `MemoryMappedFileFilterInputStreamCache`,
/// with or without a dotted package prefix.
#[derive(Clone)]
pub struct CacheRegistry {
    constructors: BTreeMap<String, CacheConstructor>,
    aliases: BTreeMap<String, String>,
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("kinds", &self.kinds())
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", |_| Ok(Box::new(MemoryCache::new())));
        registry.register("file", |ctx| {
            Ok(Box::new(FileCache::new(Arc::clone(&ctx.authority))?))
        });
        registry.register("mmap", |ctx| {
            Ok(Box::new(MmapCache::with_increment(
                Arc::clone(&ctx.authority),
                ctx.mmap_increment,
            )?))
        });
        registry.alias("MemoryFilterInputStreamCache", "memory");
        registry.alias("FileFilterInputStreamCache", "file");
        registry.alias("MemoryMappedFileFilterInputStreamCache", "mmap");
        registry
    }
}

impl CacheRegistry {
    /// Creates a registry with the built-in kinds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with no kinds at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&CacheContext) -> ReplayResult<Box<dyn CacheBackend>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    /// Makes `alias` resolve to `kind`.
    pub fn alias(&mut self, alias: impl Into<String>, kind: impl Into<String>) {
        self.aliases.insert(alias.into(), kind.into());
    }

    /// Returns the registered kind names.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Resolves `name` to a registered kind.
    #[must_use]
    pub fn resolve<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        let name = name.trim();
        let short = name.rsplit('.').next().unwrap_or(name);
        [name, short].into_iter().find_map(|candidate| {
            if let Some((kind, _)) = self.constructors.get_key_value(candidate) {
                return Some(kind.as_str());
            }
            self.aliases
                .get(candidate)
                .filter(|kind| self.constructors.contains_key(kind.as_str()))
                .map(String::as_str)
        })
    }

    /// Returns `true` if `name` resolves to a registered kind.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Builds a backend of kind `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::UnknownCacheKind`] if `name` does not resolve,
    /// or the constructor's error.
    pub fn create(&self, name: &str, ctx: &CacheContext) -> ReplayResult<Box<dyn CacheBackend>> {
        let kind = self
            .resolve(name)
            .ok_or_else(|| ReplayError::UnknownCacheKind(name.to_string()))?;
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| ReplayError::UnknownCacheKind(name.to_string()))?;
        constructor(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn context() -> (TempDir, CacheContext) {
        let root = tempdir().unwrap();
        let authority = Arc::new(TempFileAuthority::open(root.path()).unwrap());
        (root, CacheContext::new(authority).with_mmap_increment(4096))
    }

    #[test]
    fn builtin_kinds() {
        let registry = CacheRegistry::new();
        assert_eq!(registry.kinds(), vec!["file", "memory", "mmap"]);

        let (_root, ctx) = context();
        for kind in ["memory", "file", "mmap"] {
            assert_eq!(registry.create(kind, &ctx).unwrap().kind(), kind);
        }
    }

    #[test]
    fn class_style_names_resolve() {
        let registry = CacheRegistry::new();
        assert_eq!(registry.resolve("MemoryFilterInputStreamCache"), Some("memory"));
        assert_eq!(
            registry.resolve("legacy.io.FileFilterInputStreamCache"),
            Some("file")
        );
        assert_eq!(
            registry.resolve("MemoryMappedFileFilterInputStreamCache"),
            Some("mmap")
        );
        assert_eq!(registry.resolve(" memory "), Some("memory"));
    }

    #[test]
    fn unknown_kind() {
        let registry = CacheRegistry::new();
        let (_root, ctx) = context();
        assert!(!registry.contains("redis"));
        assert!(matches!(
            registry.create("redis", &ctx),
            Err(ReplayError::UnknownCacheKind(name)) if name == "redis"
        ));
        assert!(CacheRegistry::empty().create("memory", &ctx).is_err());
    }

    #[test]
    fn custom_kind() {
        let mut registry = CacheRegistry::new();
        registry.register("small-memory", |_| Ok(Box::new(MemoryCache::new())));
        registry.alias("tiny", "small-memory");

        let (_root, ctx) = context();
        assert_eq!(registry.resolve("tiny"), Some("small-memory"));
        assert_eq!(registry.create("tiny", &ctx).unwrap().kind(), "memory");
    }
}
