//! # xspool Core
//!
//! Spooled content and replayable streams for a native XML database kernel.
//!
//! This crate provides:
//! - [`Config`]: spool settings, from code, properties text or serde
//! - [`Spool`]: the owner of the temporary file authority, the content
//!   buffer pool and the replay cache registry and monitor
//! - [`SpoolStats`]: activity counters
//!
//! The building blocks are re-exported from [`xspool_storage`],
//! [`xspool_replay`] and [`xspool_codec`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod error;
mod spool;
mod stats;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use spool::Spool;
pub use stats::{SpoolStats, StatsSnapshot};

pub use xspool_codec as codec;
pub use xspool_replay as replay;
pub use xspool_storage as storage;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
