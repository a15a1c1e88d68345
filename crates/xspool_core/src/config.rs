//! Spool configuration.
//!
//! Settings can be built in code, read from `key=value` properties, or
//! deserialized with serde using the same dotted key names:
//!
//! | key | default |
//! |---|---|
//! | `content.in-memory-size` | 4 MiB |
//! | `content.pool.size` | 16 |
//! | `content.pool.max-idle` | 8 |
//! | `content.pool.fail-when-exhausted` | `false` |
//! | `binary.cache.class` | `memory` |
//! | `binary.cache.mmap-increment` | 64 MiB |
//! | `temp.root` | system temporary directory |

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use xspool_replay::DEFAULT_MMAP_INCREMENT;
use xspool_storage::{ExhaustedAction, PoolConfig};

/// Spill threshold of pooled content buffers.
pub const KEY_IN_MEMORY_SIZE: &str = "content.in-memory-size";
/// Maximum number of borrowed content buffers.
pub const KEY_POOL_SIZE: &str = "content.pool.size";
/// Maximum number of idle content buffers.
pub const KEY_POOL_MAX_IDLE: &str = "content.pool.max-idle";
/// Whether borrowing past the pool size fails instead of allocating.
pub const KEY_POOL_FAIL_WHEN_EXHAUSTED: &str = "content.pool.fail-when-exhausted";
/// Replay cache backend kind.
pub const KEY_CACHE_CLASS: &str = "binary.cache.class";
/// Growth increment of memory-mapped replay caches.
pub const KEY_MMAP_INCREMENT: &str = "binary.cache.mmap-increment";
/// Root directory for scratch directories.
pub const KEY_TEMP_ROOT: &str = "temp.root";

/// All recognized keys.
pub const KEYS: [&str; 7] = [
    KEY_IN_MEMORY_SIZE,
    KEY_POOL_SIZE,
    KEY_POOL_MAX_IDLE,
    KEY_POOL_FAIL_WHEN_EXHAUSTED,
    KEY_CACHE_CLASS,
    KEY_MMAP_INCREMENT,
    KEY_TEMP_ROOT,
];

/// Configuration for opening a [`Spool`](crate::Spool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bytes a content buffer keeps in memory before spilling; `0` spills
    /// immediately.
    #[serde(rename = "content.in-memory-size")]
    pub in_memory_size: u64,

    /// Buffers that may be borrowed at once.
    #[serde(rename = "content.pool.size")]
    pub pool_size: usize,

    /// Idle buffers kept for reuse.
    #[serde(rename = "content.pool.max-idle")]
    pub pool_max_idle: usize,

    /// Fail instead of allocating once `pool_size` buffers are out.
    #[serde(rename = "content.pool.fail-when-exhausted")]
    pub pool_fail_when_exhausted: bool,

    /// Replay cache backend name.
    #[serde(rename = "binary.cache.class")]
    pub cache_kind: String,

    /// Growth increment of memory-mapped replay caches.
    #[serde(rename = "binary.cache.mmap-increment")]
    pub mmap_increment: u64,

    /// Scratch root; `None` means the system temporary directory.
    #[serde(rename = "temp.root")]
    pub temp_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            in_memory_size: 4 * 1024 * 1024, // 4 MiB
            pool_size: 16,
            pool_max_idle: 8,
            pool_fail_when_exhausted: false,
            cache_kind: "memory".to_string(),
            mmap_increment: DEFAULT_MMAP_INCREMENT,
            temp_root: None,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::invalid_config(key, format!("cannot parse {value:?}")))
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the in-memory size.
    #[must_use]
    pub const fn in_memory_size(mut self, bytes: u64) -> Self {
        self.in_memory_size = bytes;
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    /// Sets the idle limit.
    #[must_use]
    pub const fn pool_max_idle(mut self, n: usize) -> Self {
        self.pool_max_idle = n;
        self
    }

    /// Sets whether borrowing past the pool size fails.
    #[must_use]
    pub const fn pool_fail_when_exhausted(mut self, value: bool) -> Self {
        self.pool_fail_when_exhausted = value;
        self
    }

    /// Sets the replay cache backend.
    #[must_use]
    pub fn cache_kind(mut self, kind: impl Into<String>) -> Self {
        self.cache_kind = kind.into();
        self
    }

    /// Sets the mmap growth increment.
    #[must_use]
    pub const fn mmap_increment(mut self, bytes: u64) -> Self {
        self.mmap_increment = bytes;
        self
    }

    /// Sets the scratch root.
    #[must_use]
    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Applies one setting by key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for unknown keys and unparsable
    /// values.
    pub fn set(&mut self, key: &str, value: &str) -> CoreResult<()> {
        match key {
            KEY_IN_MEMORY_SIZE => self.in_memory_size = parse(key, value)?,
            KEY_POOL_SIZE => self.pool_size = parse(key, value)?,
            KEY_POOL_MAX_IDLE => self.pool_max_idle = parse(key, value)?,
            KEY_POOL_FAIL_WHEN_EXHAUSTED => self.pool_fail_when_exhausted = parse(key, value)?,
            KEY_CACHE_CLASS => self.cache_kind = value.trim().to_string(),
            KEY_MMAP_INCREMENT => self.mmap_increment = parse(key, value)?,
            KEY_TEMP_ROOT => self.temp_root = Some(PathBuf::from(value.trim())),
            _ => return Err(CoreError::invalid_config(key, "unknown key")),
        }
        Ok(())
    }

    /// Builds a configuration from key/value pairs on top of the defaults.
    ///
    /// Keys that belong to other subsystems are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for unparsable values.
    pub fn from_pairs<'a, I>(pairs: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let key = key.trim();
            if KEYS.contains(&key) {
                config.set(key, value)?;
            } else {
                debug!(key, "ignoring unrelated configuration key");
            }
        }
        Ok(config)
    }

    /// Parses `key=value` lines. Blank lines and lines starting with `#` or
    /// `!` are skipped; `:` is accepted as the separator as well.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for lines without a separator and
    /// for unparsable values.
    pub fn from_properties(text: &str) -> CoreResult<Self> {
        let mut pairs = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once(['=', ':']).ok_or_else(|| {
                CoreError::invalid_config(
                    line,
                    format!("line {} has no '=' separator", number + 1),
                )
            })?;
            pairs.push((key, value));
        }
        Self::from_pairs(pairs)
    }

    /// Reads and parses a properties file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or the parse error.
    pub fn load_properties(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_properties(&text)
    }

    /// Renders the configuration as properties text.
    #[must_use]
    pub fn to_properties(&self) -> String {
        let mut out = format!(
            "{KEY_IN_MEMORY_SIZE}={}\n{KEY_POOL_SIZE}={}\n{KEY_POOL_MAX_IDLE}={}\n\
             {KEY_POOL_FAIL_WHEN_EXHAUSTED}={}\n{KEY_CACHE_CLASS}={}\n{KEY_MMAP_INCREMENT}={}\n",
            self.in_memory_size,
            self.pool_size,
            self.pool_max_idle,
            self.pool_fail_when_exhausted,
            self.cache_kind,
            self.mmap_increment,
        );
        if let Some(root) = &self.temp_root {
            out.push_str(&format!("{KEY_TEMP_ROOT}={}\n", root.display()));
        }
        out
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the first bad key.
    pub fn validate(&self) -> CoreResult<()> {
        if self.pool_size == 0 {
            return Err(CoreError::invalid_config(KEY_POOL_SIZE, "must be at least 1"));
        }
        if self.mmap_increment == 0 {
            return Err(CoreError::invalid_config(KEY_MMAP_INCREMENT, "must be at least 1"));
        }
        if self.cache_kind.trim().is_empty() {
            return Err(CoreError::invalid_config(KEY_CACHE_CLASS, "must not be empty"));
        }
        Ok(())
    }

    /// Returns the scratch root, falling back to the system temporary
    /// directory.
    #[must_use]
    pub fn resolved_temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Returns the content pool settings.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .in_memory_size(self.in_memory_size)
            .max_total(self.pool_size)
            .max_idle(self.pool_max_idle)
            .exhausted(if self.pool_fail_when_exhausted {
                ExhaustedAction::Fail
            } else {
                ExhaustedAction::Allocate
            })
    }
}
