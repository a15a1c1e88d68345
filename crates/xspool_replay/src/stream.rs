//! Re-readable stream over a shared replay cache.

use crate::cache::ReplayCache;
use crate::error::{ReplayError, ReplayResult};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::warn;

/// A handle that reads a one-shot source any number of times.
///
/// Each handle has its own offset and mark over a shared [`ReplayCache`].
/// Bytes behind data already pulled from the source are served from the
/// cache; bytes past it are pulled through the cache, which records them for
/// every other handle.
///
/// A handle holds one shared reference from construction (more via
/// [`increment_shared_references`](Self::increment_shared_references)).
/// [`close`](Self::close) releases one; the cache is invalidated when the
/// last reference across all handles is released. Dropping a handle
/// releases whatever it still holds.
///
/// # Example
///
/// ```rust
/// use std::io::Read;
/// use xspool_replay::{CachingReplayStream, MemoryCache, ReplayCache, ReplaySource};
///
/// let cache = ReplayCache::new(
///     Box::new(MemoryCache::new()),
///     ReplaySource::from_bytes(&b"helloWorld"[..]),
/// );
/// let mut first = CachingReplayStream::new(cache)?;
/// let mut text = String::new();
/// first.read_to_string(&mut text)?;
///
/// let mut second = first.share()?;
/// let mut again = String::new();
/// second.read_to_string(&mut again)?;
/// assert_eq!(text, again);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct CachingReplayStream {
    cache: Arc<ReplayCache>,
    offset: u32,
    mark: u32,
    held: u32,
}

impl CachingReplayStream {
    /// Creates a handle at offset 0 and takes one shared reference.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::StreamClosed`] if the cache was invalidated.
    pub fn new(cache: Arc<ReplayCache>) -> ReplayResult<Self> {
        cache.increment_shared_refs()?;
        Ok(Self {
            cache,
            offset: 0,
            mark: 0,
            held: 1,
        })
    }

    /// Creates another handle over the same cache, at offset 0.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::StreamClosed`] if the cache was invalidated.
    pub fn share(&self) -> ReplayResult<Self> {
        Self::new(Arc::clone(&self.cache))
    }

    /// Returns the shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ReplayCache> {
        &self.cache
    }

    /// Returns this handle's position.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Takes one more shared reference on behalf of this handle.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::StreamClosed`] if the cache was invalidated.
    pub fn increment_shared_references(&mut self) -> ReplayResult<()> {
        self.cache.increment_shared_refs()?;
        self.held += 1;
        Ok(())
    }

    /// Releases one shared reference held by this handle.
    ///
    /// The handle stays usable while the cache is alive. Closing a handle
    /// that holds no reference does nothing.
    ///
    /// # Errors
    ///
    /// Returns the invalidation error if this released the last reference.
    pub fn close(&mut self) -> ReplayResult<()> {
        if self.held == 0 {
            return Ok(());
        }
        self.held -= 1;
        self.cache.decrement_shared_refs()?;
        Ok(())
    }

    /// Remembers the current offset.
    pub fn mark(&mut self) {
        self.mark = self.offset;
    }

    /// Returns to the marked offset (0 if never marked).
    pub fn reset(&mut self) {
        self.offset = self.mark;
    }

    /// Returns the number of bytes readable without blocking: cached bytes
    /// ahead of this handle plus the source's length hint. `0` once closed.
    #[must_use]
    pub fn available(&self) -> u64 {
        match self.cache.lock() {
            Ok(guard) => {
                u64::from(guard.length().saturating_sub(self.offset)) + guard.available()
            }
            Err(_) => 0,
        }
    }

    /// Reads into `buf`, returning `0` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::StreamClosed`] if the source was closed, or
    /// the source or backend error.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> ReplayResult<usize> {
        let mut guard = self.cache.lock()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let length = guard.length();
        let use_cache = guard.src_offset() > 0 && length > self.offset;

        let mut total = 0;
        if use_cache {
            total = buf.len().min((length - self.offset) as usize);
            guard.copy_to(self.offset, &mut buf[..total])?;
        }
        if total < buf.len() {
            total += guard.read_through(&mut buf[total..])?;
        }

        self.offset += total as u32;
        Ok(total)
    }

    /// Reads a single byte, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Same as [`CachingReplayStream::read_bytes`].
    pub fn read_byte(&mut self) -> ReplayResult<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_bytes(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Advances by up to `n` bytes. Bytes not yet cached are still pulled
    /// from the source, so fewer than `n` are skipped only at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::SkipBounds`] if `n` is negative, and otherwise
    /// the same errors as [`CachingReplayStream::read_bytes`].
    pub fn skip(&mut self, n: i64) -> ReplayResult<u64> {
        if n < 0 {
            return Err(ReplayError::SkipBounds(n));
        }
        let n = n as u64;
        let mut guard = self.cache.lock()?;

        let length = guard.length();
        let use_cache = guard.src_offset() > 0 && length > self.offset;

        let mut total = 0u64;
        if use_cache {
            total = n.min(u64::from(length - self.offset));
        }
        if total < n {
            total += guard.skip_source(n - total)?;
        }

        self.offset += total as u32;
        Ok(total)
    }

    /// Moves back by up to `n` bytes, never before offset 0. Returns the
    /// distance moved.
    pub fn skip_backwards(&mut self, n: u32) -> u32 {
        let moved = n.min(self.offset);
        self.offset -= moved;
        moved
    }
}

impl Read for CachingReplayStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf)?)
    }
}

impl Seek for CachingReplayStream {
    /// Seeks relative to the start or the current offset. Forward seeks pull
    /// bytes from the source and stop at end of stream; seeking from the end
    /// is unsupported because the source length is unknown.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let current = i64::from(self.offset);
        let target = match pos {
            SeekFrom::Start(p) => i64::try_from(p).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek position out of range")
            })?,
            SeekFrom::Current(d) => current.checked_add(d).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek position out of range")
            })?,
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "replay streams cannot seek from the end",
                ));
            }
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }

        if target < current {
            self.skip_backwards((current - target) as u32);
        } else {
            self.skip(target - current)?;
        }
        Ok(u64::from(self.offset))
    }
}

impl Drop for CachingReplayStream {
    fn drop(&mut self) {
        while self.held > 0 {
            if let Err(e) = self.close() {
                warn!(cache = self.cache.id(), error = %e, "failed to release replay cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CacheBackend;
    use crate::registry::{CacheContext, CacheRegistry};
    use crate::source::ReplaySource;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};
    use xspool_storage::TempFileAuthority;

    const HELLO: &[u8] = b"helloWorld";
    const KINDS: [&str; 3] = ["memory", "file", "mmap"];

    struct Fixture {
        _root: TempDir,
        ctx: CacheContext,
        registry: CacheRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempdir().unwrap();
            let authority = Arc::new(TempFileAuthority::open(root.path()).unwrap());
            Self {
                _root: root,
                ctx: CacheContext::new(authority).with_mmap_increment(64),
                registry: CacheRegistry::new(),
            }
        }

        fn backend(&self, kind: &str) -> Box<dyn CacheBackend> {
            self.registry.create(kind, &self.ctx).unwrap()
        }

        fn stream(&self, kind: &str, data: &[u8]) -> CachingReplayStream {
            let source = ReplaySource::from_bytes(data.to_vec());
            CachingReplayStream::new(ReplayCache::new(self.backend(kind), source)).unwrap()
        }
    }

    /// Counts every byte handed out by the source.
    struct Counting {
        data: io::Cursor<Vec<u8>>,
        served: Arc<AtomicUsize>,
    }

    impl Read for Counting {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            self.served.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    fn byte(stream: &mut CachingReplayStream) -> u8 {
        stream.read_byte().unwrap().unwrap()
    }

    #[test]
    fn read_byte_with_mark_and_reset() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut s = fx.stream(kind, HELLO);
            assert_eq!(byte(&mut s), b'h');
            assert_eq!(byte(&mut s), b'e');
            assert_eq!(byte(&mut s), b'l');

            s.mark();
            assert_eq!(byte(&mut s), b'l');
            assert_eq!(byte(&mut s), b'o');
            assert_eq!(byte(&mut s), b'W');

            s.reset();
            assert_eq!(byte(&mut s), b'l');
            assert_eq!(byte(&mut s), b'o');
            assert_eq!(byte(&mut s), b'W');
            assert_eq!(byte(&mut s), b'o');
            assert_eq!(byte(&mut s), b'r');

            s.reset();
            for expected in *b"loWor" {
                assert_eq!(byte(&mut s), expected, "{kind}");
            }
            s.mark();
            assert_eq!(byte(&mut s), b'l');
            assert_eq!(byte(&mut s), b'd');
            s.reset();
            assert_eq!(byte(&mut s), b'l');
            assert_eq!(byte(&mut s), b'd');
            assert_eq!(s.read_byte().unwrap(), None);
        }
    }

    #[test]
    fn read_after_last_close_fails() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut s = fx.stream(kind, HELLO);
            assert_eq!(byte(&mut s), b'h');
            s.close().unwrap();
            assert!(matches!(s.read_byte(), Err(ReplayError::StreamClosed)));

            let mut buf = [0u8; 2];
            let err = s.read(&mut buf).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::Other);
        }
    }

    #[test]
    fn end_of_stream_from_cache() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut s = fx.stream(kind, b"he");
            s.mark();
            assert_eq!(byte(&mut s), b'h');
            assert_eq!(byte(&mut s), b'e');
            s.reset();
            assert_eq!(byte(&mut s), b'h');
            assert_eq!(byte(&mut s), b'e');
            assert_eq!(s.read_byte().unwrap(), None);
        }
    }

    #[test]
    fn read_bytes_mixes_cache_and_source() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut s = fx.stream(kind, HELLO);

            let mut first = [0u8; 5];
            assert_eq!(s.read_bytes(&mut first).unwrap(), 5);
            assert_eq!(&first, b"hello");
            s.reset();

            let mut all = [0u8; 10];
            assert_eq!(s.read_bytes(&mut all).unwrap(), 10);
            assert_eq!(&all, HELLO);

            let mut more = [0u8; 10];
            assert_eq!(s.read_bytes(&mut more).unwrap(), 0);
            assert_eq!(more, [0u8; 10]);
        }
    }

    #[test]
    fn read_bytes_at_marked_offsets() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut s = fx.stream(kind, HELLO);
            let mut three = [0u8; 3];
            s.read_bytes(&mut three).unwrap();

            s.mark();
            assert_eq!(s.read_bytes(&mut three).unwrap(), 3);
            assert_eq!(&three, b"loW");
            s.reset();
            assert_eq!(s.read_bytes(&mut three).unwrap(), 3);
            assert_eq!(&three, b"loW");

            let mut two = [0u8; 2];
            assert_eq!(s.read_bytes(&mut two).unwrap(), 2);
            assert_eq!(&two, b"or");

            s.reset();
            let mut five = [0u8; 5];
            assert_eq!(s.read_bytes(&mut five).unwrap(), 5);
            assert_eq!(&five, b"loWor");

            s.mark();
            assert_eq!(s.read_bytes(&mut five).unwrap(), 2);
            assert_eq!(&five[..2], b"ld");
            s.reset();
            assert_eq!(s.read_bytes(&mut two).unwrap(), 2);
            assert_eq!(&two, b"ld");
        }
    }

    #[test]
    fn skip_reads_through_source() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut s = fx.stream(kind, HELLO);
            assert_eq!(byte(&mut s), b'h');
            assert_eq!(byte(&mut s), b'e');
            s.mark();

            assert_eq!(s.skip(2).unwrap(), 2);
            assert_eq!(byte(&mut s), b'o');

            // Skipped bytes were cached and replay normally.
            s.reset();
            assert_eq!(byte(&mut s), b'l');
            assert_eq!(byte(&mut s), b'l');

            assert_eq!(s.skip(3).unwrap(), 3);
            assert_eq!(byte(&mut s), b'r');
            assert_eq!(s.skip(100).unwrap(), 2);
            assert_eq!(s.skip(1).unwrap(), 0);
            assert_eq!(s.offset(), 10);
        }
    }

    #[test]
    fn negative_skip_is_rejected() {
        let fx = Fixture::new();
        let mut s = fx.stream("memory", HELLO);
        assert!(matches!(s.skip(-3), Err(ReplayError::SkipBounds(-3))));
        assert_eq!(s.offset(), 0);
    }

    #[test]
    fn skip_after_close_fails() {
        let fx = Fixture::new();
        let mut s = fx.stream("file", HELLO);
        s.close().unwrap();
        assert!(matches!(s.skip(1), Err(ReplayError::StreamClosed)));
    }

    #[test]
    fn skip_backwards_clamps() {
        let fx = Fixture::new();
        let mut s = fx.stream("memory", HELLO);
        s.skip(4).unwrap();
        assert_eq!(s.skip_backwards(1), 1);
        assert_eq!(s.offset(), 3);
        assert_eq!(s.skip_backwards(10), 3);
        assert_eq!(s.offset(), 0);
        assert_eq!(byte(&mut s), b'h');
    }

    #[test]
    fn independent_offsets_on_shared_cache() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut a = fx.stream(kind, HELLO);
            let mut b = a.share().unwrap();
            assert_eq!(a.cache().shared_refs(), 2);

            assert_eq!(a.skip(5).unwrap(), 5);
            assert_eq!(a.offset(), 5);
            assert_eq!(b.offset(), 0);
            assert_eq!(b.skip(5).unwrap(), 5);
            assert_eq!(b.offset(), 5);
        }
    }

    #[test]
    fn available_counts_cache_and_source() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut s = fx.stream(kind, HELLO);
            assert_eq!(s.available(), 10);

            let mut two = [0u8; 2];
            s.read_bytes(&mut two).unwrap();
            assert_eq!(s.available(), 8);

            s.reset();
            assert_eq!(s.available(), 10);

            s.skip(2).unwrap();
            let mut rest = Vec::new();
            s.read_to_end(&mut rest).unwrap();
            s.reset();
            s.skip(2).unwrap();
            assert_eq!(s.available(), 8);
        }
    }

    #[test]
    fn available_after_close_is_zero() {
        let fx = Fixture::new();
        let mut s = fx.stream("mmap", HELLO);
        s.close().unwrap();
        assert_eq!(s.available(), 0);

        let mut empty = fx.stream("memory", b"");
        assert_eq!(empty.available(), 0);
        empty.close().unwrap();
        assert_eq!(empty.available(), 0);
    }

    #[test]
    fn shared_references_delay_invalidation() {
        let fx = Fixture::new();
        for kind in KINDS {
            let mut s = fx.stream(kind, HELLO);
            s.increment_shared_references().unwrap();
            assert_eq!(s.cache().shared_refs(), 2);

            s.close().unwrap();
            assert!(!s.cache().is_invalidated());
            assert_eq!(byte(&mut s), b'h');
            assert_eq!(byte(&mut s), b'e');

            s.close().unwrap();
            assert!(s.cache().is_invalidated());
            assert!(s.read_byte().is_err());

            // Nothing left to release.
            s.close().unwrap();
        }
    }

    #[test]
    fn last_close_releases_backing_files() {
        let fx = Fixture::new();
        for kind in ["file", "mmap"] {
            let mut a = fx.stream(kind, HELLO);
            let mut b = a.share().unwrap();
            let mut all = Vec::new();
            a.read_to_end(&mut all).unwrap();
            assert_eq!(fx.ctx.authority.outstanding(), 1);

            a.close().unwrap();
            assert_eq!(fx.ctx.authority.outstanding(), 1);
            let mut again = Vec::new();
            b.read_to_end(&mut again).unwrap();
            assert_eq!(again, HELLO);

            b.close().unwrap();
            assert_eq!(fx.ctx.authority.outstanding(), 0);
        }
    }

    #[test]
    fn dropping_handles_releases_cache() {
        let fx = Fixture::new();
        let cache = {
            let a = fx.stream("file", HELLO);
            let _b = a.share().unwrap();
            Arc::clone(a.cache())
        };
        assert!(cache.is_invalidated());
        assert_eq!(cache.shared_refs(), 0);
        assert_eq!(fx.ctx.authority.outstanding(), 0);
    }

    #[test]
    fn closed_source_fails_every_handle() {
        let fx = Fixture::new();
        let mut a = fx.stream("memory", HELLO);
        let mut b = a.share().unwrap();
        a.read_byte().unwrap();

        a.cache().close_source();
        assert!(matches!(a.read_byte(), Err(ReplayError::StreamClosed)));
        assert!(matches!(b.read_byte(), Err(ReplayError::StreamClosed)));
        assert!(matches!(b.share().map(|_| ()), Ok(())));
    }

    #[test]
    fn share_after_invalidation_fails() {
        let fx = Fixture::new();
        let mut a = fx.stream("memory", HELLO);
        a.close().unwrap();
        assert!(matches!(a.share(), Err(ReplayError::StreamClosed)));
        assert!(matches!(
            a.increment_shared_references(),
            Err(ReplayError::StreamClosed)
        ));
    }

    #[test]
    fn seek_moves_within_stream() {
        let fx = Fixture::new();
        let mut s = fx.stream("memory", HELLO);
        assert_eq!(s.seek(SeekFrom::Start(5)).unwrap(), 5);
        assert_eq!(byte(&mut s), b'W');
        assert_eq!(s.seek(SeekFrom::Current(-6)).unwrap(), 0);
        assert_eq!(byte(&mut s), b'h');
        assert_eq!(s.seek(SeekFrom::Start(50)).unwrap(), 10);
        assert!(s.seek(SeekFrom::End(0)).is_err());
        assert!(s.seek(SeekFrom::Current(-11)).is_err());
    }

    #[test]
    fn mark_reset_like_content_sniffers() {
        let fx = Fixture::new();
        let data: Vec<u8> = (0..2149u32).map(|i| (i * 31 % 251) as u8).collect();
        for kind in KINDS {
            let mut s = fx.stream(kind, &data);
            s.mark();
            assert_eq!(byte(&mut s), data[0]);

            s.reset();
            let mut buf1 = vec![0u8; 1024];
            assert_eq!(s.read_bytes(&mut buf1).unwrap(), 1024);
            assert_eq!(buf1, data[..1024]);

            s.reset();
            assert_eq!(byte(&mut s), data[0]);

            s.reset();
            let mut buf2 = vec![0u8; 65536];
            assert_eq!(s.read_bytes(&mut buf2).unwrap(), 2149);
            assert_eq!(buf2[..2149], data[..]);
            s.reset();
        }
    }

    #[test]
    fn source_read_at_most_once_per_range() {
        let fx = Fixture::new();
        for kind in KINDS {
            let served = Arc::new(AtomicUsize::new(0));
            let source = ReplaySource::new(Counting {
                data: io::Cursor::new(HELLO.to_vec()),
                served: Arc::clone(&served),
            });
            let cache = ReplayCache::new(fx.backend(kind), source);
            let mut a = CachingReplayStream::new(cache).unwrap();

            let mut first = Vec::new();
            a.read_to_end(&mut first).unwrap();
            let mut b = a.share().unwrap();
            let mut second = Vec::new();
            b.read_to_end(&mut second).unwrap();
            a.reset();
            let mut third = Vec::new();
            a.read_to_end(&mut third).unwrap();

            assert_eq!(first, HELLO);
            assert_eq!(second, HELLO);
            assert_eq!(third, HELLO);
            assert_eq!(served.load(Ordering::SeqCst), HELLO.len());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn replay_equivalence(
            data in prop::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..300,
            kind in prop::sample::select(KINDS.to_vec()),
        ) {
            let fx = Fixture::new();
            let mut first = fx.stream(kind, &data);

            let mut once = Vec::new();
            let mut buf = vec![0u8; chunk];
            loop {
                let n = first.read_bytes(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                once.extend_from_slice(&buf[..n]);
            }

            let mut second = first.share().unwrap();
            let mut twice = Vec::new();
            second.read_to_end(&mut twice).unwrap();

            prop_assert_eq!(&once, &data);
            prop_assert_eq!(&twice, &data);
        }
    }
}
