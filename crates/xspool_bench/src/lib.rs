//! Shared helpers for the xspool benchmarks.

pub mod utils;
