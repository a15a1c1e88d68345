//! # xspool Replay
//!
//! Makes one-shot byte sources re-readable.
//!
//! A [`ReplayCache`] owns a [`ReplaySource`] and records every byte pulled
//! from it into a [`CacheBackend`]. Any number of [`CachingReplayStream`]
//! handles read the same cache, each with its own offset and mark, so a
//! source that cannot seek can still be sniffed, rewound and read again.
//!
//! ## Backends
//!
//! - [`MemoryCache`]: growable heap buffer
//! - [`FileCache`]: append-only temporary file
//! - [`MmapCache`]: memory-mapped temporary file grown in fixed increments
//!
//! Backends are chosen by name through a [`CacheRegistry`]; live caches can
//! be inspected with a [`CacheMonitor`].
//!
//! ## Example
//!
//! ```rust
//! use std::io::Read;
//! use xspool_replay::{CachingReplayStream, MemoryCache, ReplayCache, ReplaySource};
//!
//! let cache = ReplayCache::new(
//!     Box::new(MemoryCache::new()),
//!     ReplaySource::from_bytes(&b"<?xml version='1.0'?><doc/>"[..]),
//! );
//! let mut stream = CachingReplayStream::new(cache)?;
//!
//! stream.mark();
//! let mut prolog = [0u8; 5];
//! stream.read_exact(&mut prolog)?;
//! assert_eq!(&prolog, b"<?xml");
//! stream.reset();
//!
//! let mut whole = String::new();
//! stream.read_to_string(&mut whole)?;
//! assert!(whole.starts_with("<?xml"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cache;
mod error;
mod file;
mod memory;
mod mmap;
mod monitor;
mod registry;
mod source;
mod stream;

pub use backend::{CacheBackend, MAX_CACHE_LEN};
pub use cache::{CacheGuard, ReplayCache};
pub use error::{ReplayError, ReplayResult};
pub use file::FileCache;
pub use memory::MemoryCache;
pub use mmap::{MmapCache, DEFAULT_MMAP_INCREMENT};
pub use monitor::{CacheMonitor, CacheSnapshot};
pub use registry::{CacheConstructor, CacheContext, CacheRegistry};
pub use source::ReplaySource;
pub use stream::CachingReplayStream;
