//! # xspool Testkit
//!
//! Test utilities for xspool.
//!
//! This crate provides:
//! - Fixtures that give each test a private scratch root
//! - Property-based test generators using proptest
//! - Cross-crate integration test helpers
//! - Stress testing utilities
//! - Byte-level codec test vectors
//!
//! ## Usage
//!
//! ```rust
//! use std::io::Write;
//! use xspool_testkit::prelude::*;
//!
//! with_threshold(16, |spool| {
//!     let buffer = spool.borrow_content().unwrap();
//!     buffer.new_writer().unwrap().write_all(&pattern(64)).unwrap();
//!     assert!(buffer.is_spilled());
//!     spool.give_back(buffer);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
pub use vectors::*;
