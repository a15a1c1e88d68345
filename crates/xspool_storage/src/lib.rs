//! # xspool Storage
//!
//! Memory-first byte staging for the xspool kernel.
//!
//! Payloads are written into a [`BlockStore`] and move to a temporary file
//! once they outgrow their in-memory budget. Temporary files come from a
//! single per-process [`TempFileAuthority`], which also reclaims scratch
//! directories left behind by crashed processes.
//!
//! ## Components
//!
//! - [`BlockStore`] / [`BlockStoreReader`]: fixed-size block byte store with
//!   independent or shared readers
//! - [`OverflowWriter`]: buffers up to a threshold, then drains to disk
//! - [`VirtualContentBuffer`]: the [`ContentFile`] pooled by the kernel
//! - [`ContentBufferPool`]: bounded reuse of content buffers
//! - [`TempFileAuthority`]: scratch directory ownership and orphan sweeping
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::io::Write;
//! use std::sync::Arc;
//! use xspool_storage::{ContentBufferPool, PoolConfig, TempFileAuthority};
//!
//! let authority = Arc::new(TempFileAuthority::open_default()?);
//! let pool = ContentBufferPool::new(authority, PoolConfig::default());
//!
//! let buffer = pool.borrow()?;
//! buffer.new_writer()?.write_all(b"payload")?;
//! assert_eq!(buffer.read_all()?, b"payload");
//! pool.give_back(buffer);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod content;
mod error;
mod overflow;
mod pool;
pub mod temp;

pub use block::{BlockLimit, BlockStore, BlockStoreReader, BLOCK_SIZE};
pub use content::{
    BytesContent, ContentFile, ContentReader, ContentWriter, PathContent, VirtualContentBuffer,
};
pub use error::{StorageError, StorageResult};
pub use overflow::OverflowWriter;
pub use pool::{ContentBufferPool, ExhaustedAction, PoolConfig, PoolStats};
pub use temp::{ClaimOutcome, SweepReport, TempFileAuthority};
