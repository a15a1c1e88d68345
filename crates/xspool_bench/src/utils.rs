//! Benchmark utilities.

use rand::Rng;
use std::sync::Arc;
use tempfile::TempDir;
use xspool_core::{Config, Spool};
use xspool_storage::TempFileAuthority;

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` random `i64` values whose magnitudes spread across
/// every VLQ length.
pub fn random_longs(count: usize) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| rng.gen::<i64>() >> rng.gen_range(0u32..64))
        .collect()
}

/// A temporary file authority in its own directory.
pub fn authority() -> (TempDir, Arc<TempFileAuthority>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let authority = TempFileAuthority::open(dir.path()).expect("Failed to open authority");
    (dir, Arc::new(authority))
}

/// A spool in its own directory.
pub fn spool(configure: impl FnOnce(Config) -> Config) -> (TempDir, Spool) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let spool = Spool::open(configure(Config::default()).temp_root(dir.path()))
        .expect("Failed to open spool");
    (dir, spool)
}
