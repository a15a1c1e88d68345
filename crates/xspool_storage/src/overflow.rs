//! Memory-first writer that spills to disk past a threshold.

use crate::block::BlockStore;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::debug;

enum Sink<F, W> {
    Buffered(Option<F>),
    Spilled(W),
}

/// A [`Write`] sink that buffers into a [`BlockStore`] until `threshold`
/// bytes, then moves everything to a lazily created disk sink.
///
/// Bytes are buffered while `count + len < threshold`. The first write that
/// would reach the threshold (or a single write of `threshold` bytes or more)
/// invokes the factory, drains the store into the new sink, resets the store
/// and latches into overflow mode. From then on every write goes straight to
/// the sink, however small.
pub struct OverflowWriter<F, W> {
    threshold: u64,
    store: Arc<BlockStore>,
    count: u64,
    sink: Sink<F, W>,
}

impl<F, W> fmt::Debug for OverflowWriter<F, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverflowWriter")
            .field("threshold", &self.threshold)
            .field("count", &self.count)
            .field("overflowed", &self.is_overflowed())
            .finish_non_exhaustive()
    }
}

impl<F, W> OverflowWriter<F, W> {
    /// Returns `true` once the writer has moved to the disk sink.
    pub fn is_overflowed(&self) -> bool {
        matches!(self.sink, Sink::Spilled(_))
    }

    /// Returns the number of bytes written so far, including bytes that
    /// were in the store at construction.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns `true` if writing `len` more bytes would trigger the spill.
    pub fn would_spill(&self, len: usize) -> bool {
        !self.is_overflowed() && self.count.saturating_add(len as u64) >= self.threshold
    }
}

impl<F, W> OverflowWriter<F, W>
where
    F: FnOnce() -> io::Result<W>,
    W: Write,
{
    /// Creates a writer over `store`.
    ///
    /// Bytes already in the store count towards the threshold, so a second
    /// writer over the same store continues where the first stopped.
    pub fn new(threshold: u64, store: Arc<BlockStore>, factory: F) -> Self {
        let count = store.size();
        Self {
            threshold,
            store,
            count,
            sink: Sink::Buffered(Some(factory)),
        }
    }

    /// Returns the disk sink, if the writer has overflowed.
    pub fn into_sink(self) -> Option<W> {
        match self.sink {
            Sink::Spilled(sink) => Some(sink),
            Sink::Buffered(_) => None,
        }
    }

    fn spill(&mut self) -> io::Result<()> {
        let Sink::Buffered(factory) = &mut self.sink else {
            return Ok(());
        };
        let factory = factory
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "spill factory already failed"))?;

        let mut sink = factory()?;
        let drained = self.store.transfer_to(&mut sink, 0)?;
        self.store.reset();
        debug!(bytes = drained, threshold = self.threshold, "spilled buffered content to disk");

        self.sink = Sink::Spilled(sink);
        Ok(())
    }
}

impl<F, W> Write for OverflowWriter<F, W>
where
    F: FnOnce() -> io::Result<W>,
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.would_spill(buf.len()) {
            self.spill()?;
        }
        if let Sink::Spilled(sink) = &mut self.sink {
            let n = sink.write(buf)?;
            self.count += n as u64;
            return Ok(n);
        }
        self.store.append(buf)?;
        self.count += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Spilled(sink) => sink.flush(),
            Sink::Buffered(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// A factory that records how often it ran and hands out a shared Vec.
    fn counting_factory(
        calls: &Rc<Cell<usize>>,
    ) -> impl FnOnce() -> io::Result<Vec<u8>> {
        let calls = Rc::clone(calls);
        move || {
            calls.set(calls.get() + 1);
            Ok(Vec::new())
        }
    }

    #[test]
    fn below_threshold_stays_in_memory() {
        let store = Arc::new(BlockStore::new());
        let calls = Rc::new(Cell::new(0));
        let mut writer = OverflowWriter::new(10, Arc::clone(&store), counting_factory(&calls));

        writer.write_all(b"123456789").unwrap();
        writer.flush().unwrap();

        assert!(!writer.is_overflowed());
        assert_eq!(calls.get(), 0);
        assert_eq!(store.to_vec(), b"123456789");
        assert!(writer.into_sink().is_none());
    }

    #[test]
    fn reaching_threshold_spills_once() {
        let store = Arc::new(BlockStore::new());
        let calls = Rc::new(Cell::new(0));
        let mut writer = OverflowWriter::new(10, Arc::clone(&store), counting_factory(&calls));

        writer.write_all(b"123456789").unwrap();
        writer.write_all(b"0").unwrap();
        writer.write_all(b"abc").unwrap();

        assert!(writer.is_overflowed());
        assert_eq!(calls.get(), 1);
        assert_eq!(store.size(), 0);
        assert_eq!(writer.count(), 13);
        assert_eq!(writer.into_sink().unwrap(), b"1234567890abc");
    }

    #[test]
    fn single_large_write_spills() {
        let store = Arc::new(BlockStore::new());
        let calls = Rc::new(Cell::new(0));
        let mut writer = OverflowWriter::new(4, Arc::clone(&store), counting_factory(&calls));

        writer.write_all(b"abcd").unwrap();
        assert!(writer.is_overflowed());
        assert_eq!(calls.get(), 1);
        assert_eq!(writer.into_sink().unwrap(), b"abcd");
    }

    #[test]
    fn tiny_writes_after_overflow_stay_on_disk() {
        let store = Arc::new(BlockStore::new());
        let calls = Rc::new(Cell::new(0));
        let mut writer = OverflowWriter::new(3, Arc::clone(&store), counting_factory(&calls));

        writer.write_all(b"abcdef").unwrap();
        for _ in 0..5 {
            writer.write_all(b"x").unwrap();
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(store.size(), 0);
        assert_eq!(writer.into_sink().unwrap(), b"abcdefxxxxx");
    }

    #[test]
    fn existing_store_content_counts() {
        let store = Arc::new(BlockStore::new());
        store.append(b"12345").unwrap();

        let calls = Rc::new(Cell::new(0));
        let mut writer = OverflowWriter::new(8, Arc::clone(&store), counting_factory(&calls));
        assert_eq!(writer.count(), 5);
        assert!(writer.would_spill(3));
        assert!(!writer.would_spill(2));

        writer.write_all(b"678").unwrap();
        assert_eq!(writer.into_sink().unwrap(), b"12345678");
    }

    #[test]
    fn factory_error_is_propagated() {
        let store = Arc::new(BlockStore::new());
        let mut writer = OverflowWriter::new(2, Arc::clone(&store), || -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no disk"))
        });

        let err = writer.write_all(b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(!writer.is_overflowed());
        assert!(writer.write_all(b"abc").is_err());
    }

    #[test]
    fn debug_shows_overflow_state() {
        let store = Arc::new(BlockStore::new());
        let calls = Rc::new(Cell::new(0));
        let mut writer = OverflowWriter::new(2, Arc::clone(&store), counting_factory(&calls));
        assert!(format!("{writer:?}").contains("overflowed: false"));

        writer.write_all(b"ab").unwrap();
        assert!(format!("{writer:?}").contains("overflowed: true"));
    }
}
