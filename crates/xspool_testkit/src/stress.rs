//! Stress tests for the spool.
//!
//! These tests verify behavior under heavy load and concurrent access.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use xspool_core::Spool;
use xspool_replay::{CachingReplayStream, ReplaySource};

/// Outcome counts and timing of one stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Operations that completed and verified.
    pub successful_ops: usize,
    /// Operations that errored or read back wrong bytes.
    pub failed_ops: usize,
    /// Wall-clock time of the run.
    pub duration: Duration,
}

impl StressTestResult {
    /// Records a finished run.
    pub fn new(successful_ops: usize, failed_ops: usize, duration: Duration) -> Self {
        Self {
            successful_ops,
            failed_ops,
            duration,
        }
    }

    /// All operations attempted.
    pub fn total_ops(&self) -> usize {
        self.successful_ops + self.failed_ops
    }

    /// Throughput, `0.0` for an instant run.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops() as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a one-line summary.
    pub fn print_summary(&self, name: &str) {
        println!(
            "{name}: {}/{} ok in {:?} ({:.0} ops/s)",
            self.successful_ops,
            self.total_ops(),
            self.duration,
            self.ops_per_second()
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Payload size in bytes.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            payload_size: 256,
        }
    }
}

fn payload(size: usize, seed: usize) -> Vec<u8> {
    (0..size).map(|i| (i ^ seed) as u8).collect()
}

fn fill_and_check(spool: &Spool, data: &[u8]) -> bool {
    let Ok(buffer) = spool.borrow_content() else {
        return false;
    };
    let written = buffer.new_writer().and_then(|mut w| {
        w.write_all(data)?;
        w.finish()
    });
    let ok = written.is_ok() && buffer.read_all().map(|back| back == data).unwrap_or(false);
    spool.give_back(buffer);
    ok
}

/// Borrow, fill, verify and give back buffers on one thread.
pub fn stress_sequential_buffers(spool: &Spool, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        if fill_and_check(spool, &payload(config.payload_size, i)) {
            successful += 1;
        } else {
            failed += 1;
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Borrow, fill, verify and give back buffers from several threads at once.
pub fn stress_concurrent_buffers(spool: Arc<Spool>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let spool = Arc::clone(&spool);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let size = config.payload_size;

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let counter = if fill_and_check(&spool, &payload(size, t * ops_per_thread + i)) {
                        &successful
                    } else {
                        &failed
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Read one replay cache through a handle per thread, each thread reading
/// the whole payload `operations / threads` bytes at a time.
pub fn stress_shared_replay(spool: &Spool, kind: &str, config: &StressConfig) -> StressTestResult {
    let data = Arc::new(payload(config.payload_size, 0x5a));
    let cache = spool
        .replay_cache_of(kind, ReplaySource::from_bytes(data.to_vec()))
        .expect("Failed to create cache");
    let first = spool.open_stream(cache).expect("Failed to open stream");
    let mut streams: Vec<CachingReplayStream> = (1..config.threads)
        .map(|_| spool.share_stream(&first).expect("Failed to share stream"))
        .collect();
    streams.push(first);

    let chunk = (config.operations / config.threads).max(1);
    let barrier = Arc::new(Barrier::new(streams.len()));
    let start = Instant::now();

    let handles: Vec<_> = streams
        .into_iter()
        .map(|mut stream| {
            let data = Arc::clone(&data);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut out = Vec::with_capacity(data.len());
                let mut buf = vec![0u8; chunk];
                loop {
                    match stream.read_bytes(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => out.extend_from_slice(&buf[..n]),
                        Err(_) => return false,
                    }
                }
                stream.close().is_ok() && out == *data
            })
        })
        .collect();

    let mut successful = 0usize;
    let mut failed = 0usize;
    for handle in handles {
        if handle.join().expect("Thread panicked") {
            successful += 1;
        } else {
            failed += 1;
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Issue and return scratch files from several threads at once.
pub fn stress_temp_files(spool: Arc<Spool>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let spool = Arc::clone(&spool);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    let ok = spool
                        .temporary_file()
                        .map(|path| spool.return_temporary_file(&path))
                        .unwrap_or(false);
                    let counter = if ok { &successful } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::CACHE_KINDS;
    use tempfile::TempDir;
    use xspool_core::Config;

    fn create_spool(dir: &TempDir, in_memory_size: u64) -> Spool {
        Spool::open(
            Config::default()
                .temp_root(dir.path())
                .in_memory_size(in_memory_size)
                .mmap_increment(4096),
        )
        .expect("Failed to create spool")
    }

    #[test]
    fn test_sequential_buffers() {
        let dir = TempDir::new().unwrap();
        let spool = create_spool(&dir, 100);
        let config = StressConfig {
            operations: 200,
            payload_size: 150,
            ..Default::default()
        };

        let result = stress_sequential_buffers(&spool, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 200);
        assert_eq!(spool.authority().outstanding(), 0);
    }

    #[test]
    fn test_concurrent_buffers() {
        let dir = TempDir::new().unwrap();
        let spool = Arc::new(create_spool(&dir, 64));
        let config = StressConfig {
            operations: 400,
            threads: 4,
            payload_size: 100,
        };

        let result = stress_concurrent_buffers(Arc::clone(&spool), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(spool.authority().outstanding(), 0);
        let pool = spool.pool_stats();
        assert_eq!(pool.active, 0);
        assert!(pool.idle <= spool.config().pool_max_idle);
    }

    #[test]
    fn test_shared_replay() {
        let dir = TempDir::new().unwrap();
        let spool = create_spool(&dir, 1024);
        let config = StressConfig {
            operations: 4 * 37,
            threads: 4,
            payload_size: 20_000,
        };

        for kind in CACHE_KINDS {
            let result = stress_shared_replay(&spool, kind, &config);
            assert_eq!(result.failed_ops, 0, "kind {kind}");
            assert_eq!(result.successful_ops, 4);
        }
        assert!(spool.monitor().is_empty());
        assert_eq!(spool.authority().outstanding(), 0);
    }

    #[test]
    fn test_temp_files() {
        let dir = TempDir::new().unwrap();
        let spool = Arc::new(create_spool(&dir, 1024));
        let config = StressConfig {
            operations: 400,
            threads: 8,
            ..Default::default()
        };

        let result = stress_temp_files(Arc::clone(&spool), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
        assert_eq!(spool.authority().outstanding(), 0);
    }
}
