//! Cross-crate integration test helpers.
//!
//! Provides utilities for testing the content buffers, replay caches and
//! temporary file authority together through a [`Spool`].

use crate::fixtures::TestSpool;
use std::io::{Read, Write};
use xspool_core::{Config, Spool};
use xspool_replay::{CachingReplayStream, ReplaySource};
use xspool_storage::VirtualContentBuffer;

/// A test harness that remembers what was written to each buffer.
pub struct SpoolHarness {
    /// The spool fixture.
    pub spool: TestSpool,
    buffers: Vec<(VirtualContentBuffer, Vec<u8>)>,
}

impl SpoolHarness {
    /// Creates a harness with the default configuration.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a harness after adjusting the default configuration.
    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        Self {
            spool: TestSpool::with_config(configure),
            buffers: Vec::new(),
        }
    }

    /// Borrows a buffer, writes `data` in `chunk`-sized writes and tracks
    /// it. Returns the buffer's index.
    pub fn write(&mut self, data: &[u8], chunk: usize) -> usize {
        let buffer = self.spool.borrow_content().expect("Failed to borrow buffer");
        let mut writer = buffer.new_writer().expect("Failed to open writer");
        for part in data.chunks(chunk.max(1)) {
            writer.write_all(part).expect("Failed to write");
        }
        writer.finish().expect("Failed to finish writer");
        self.buffers.push((buffer, data.to_vec()));
        self.buffers.len() - 1
    }

    /// Returns the tracked buffer at `index`.
    pub fn buffer(&self, index: usize) -> &VirtualContentBuffer {
        &self.buffers[index].0
    }

    /// Reads back the buffer at `index` and checks it against what was
    /// written.
    pub fn read_and_verify(&self, index: usize) -> Vec<u8> {
        let (buffer, expected) = &self.buffers[index];
        let actual = buffer.read_all().expect("Failed to read buffer");
        assert_eq!(&actual, expected, "content mismatch for buffer {index}");
        actual
    }

    /// Verifies every tracked buffer.
    pub fn verify_all(&self) {
        for index in 0..self.buffers.len() {
            self.read_and_verify(index);
        }
    }

    /// Number of tracked buffers that have spilled to disk.
    pub fn spilled_count(&self) -> usize {
        self.buffers.iter().filter(|(b, _)| b.is_spilled()).count()
    }

    /// Returns every tracked buffer to the pool.
    pub fn give_back_all(&mut self) {
        for (buffer, _) in self.buffers.drain(..) {
            self.spool.give_back(buffer);
        }
    }

    /// Returns the count of tracked buffers.
    pub fn tracked_count(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for SpoolHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Content buffer and temporary file integration.
pub mod content {
    use super::*;

    /// Checks that a buffer holding more than its budget moved to exactly
    /// one scratch file, and that giving it back deletes that file.
    pub fn test_spill_and_release(spool: &Spool, data: &[u8]) {
        let budget = spool.config().in_memory_size;
        assert!(data.len() as u64 > budget, "payload must exceed the budget");

        let before = spool.authority().outstanding();
        let buffer = spool.borrow_content().expect("Failed to borrow buffer");
        buffer
            .new_writer()
            .and_then(|mut w| {
                w.write_all(data)?;
                w.finish()
            })
            .expect("Failed to write buffer");

        assert!(buffer.is_spilled(), "buffer should have spilled");
        let path = buffer.path().expect("spilled buffer has a path");
        assert!(path.exists());
        assert_eq!(spool.authority().outstanding(), before + 1);
        assert_eq!(buffer.read_all().expect("Failed to read"), data);

        spool.give_back(buffer);
        assert!(!path.exists(), "scratch file should be deleted");
        assert_eq!(spool.authority().outstanding(), before);
    }
}

/// Replay cache integration.
pub mod replay {
    use super::*;

    /// Replays `data` through a cache of `kind` with two handles and checks
    /// both see the same bytes and the cache is released afterwards.
    pub fn test_shared_replay(spool: &Spool, kind: &str, data: &[u8]) {
        let cache = spool
            .replay_cache_of(kind, ReplaySource::from_bytes(data.to_vec()))
            .expect("Failed to create cache");
        let mut first = spool.open_stream(cache).expect("Failed to open stream");
        let mut second = spool.share_stream(&first).expect("Failed to share stream");

        let a = read_to_end(&mut first);
        let b = read_to_end(&mut second);
        assert_eq!(a, data);
        assert_eq!(b, data);

        let cache = first.cache().clone();
        first.close().expect("Failed to close first");
        assert!(!cache.is_invalidated());
        second.close().expect("Failed to close second");
        assert!(cache.is_invalidated());
        assert!(
            spool.monitor().snapshot().iter().all(|s| s.id != cache.id()),
            "monitor should forget the cache"
        );
    }

    /// Reads a stream to its end.
    pub fn read_to_end(stream: &mut CachingReplayStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).expect("Failed to read stream");
        out
    }
}
