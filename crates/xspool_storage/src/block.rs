//! Block-addressed in-memory byte store.
//!
//! Bytes live in one direct block plus a lazily grown list of indirect
//! blocks, all [`BLOCK_SIZE`] bytes long. Byte offset `o` lives in block
//! `o / BLOCK_SIZE`; block 0 is the direct block and block `b > 0` is
//! `indirect[b - 1]`.
//!
//! Writing past the current size extends the store. The content of the gap
//! is unspecified; callers must not rely on it being zero.

use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Size of every block in bytes.
pub const BLOCK_SIZE: usize = 4096;

const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// Upper bound on the number of blocks a store may hold.
///
/// The classic limit is [`BLOCK_SIZE`] blocks (16 MiB). Content buffers size
/// their limit from the spill threshold instead, so it never binds there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLimit {
    /// At most this many blocks, direct block included.
    Blocks(u64),
    /// No ceiling besides available memory.
    Unbounded,
}

impl Default for BlockLimit {
    fn default() -> Self {
        Self::Blocks(BLOCK_SIZE_U64)
    }
}

impl BlockLimit {
    /// Smallest limit able to hold `bytes` bytes.
    #[must_use]
    pub fn for_bytes(bytes: u64) -> Self {
        Self::Blocks(bytes.div_ceil(BLOCK_SIZE_U64).max(1))
    }

    fn max_blocks(self) -> u64 {
        match self {
            Self::Blocks(limit) => limit,
            Self::Unbounded => u64::MAX,
        }
    }

    fn check(self, required: u64) -> StorageResult<()> {
        match self {
            Self::Blocks(limit) if required > limit => {
                Err(StorageError::CapacityExceeded { required, limit })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
struct Blocks {
    size: u64,
    direct: Box<[u8]>,
    indirect: Vec<Option<Box<[u8]>>>,
    allocated: usize,
}

impl Blocks {
    fn new() -> Self {
        Self {
            size: 0,
            direct: new_block(),
            indirect: Vec::new(),
            allocated: 0,
        }
    }

    fn block(&self, index: usize) -> &[u8] {
        if index == 0 {
            return &self.direct;
        }
        match self.indirect.get(index - 1) {
            Some(Some(block)) => block,
            _ => unreachable!("block {index} read before allocation"),
        }
    }

    fn block_mut(&mut self, index: usize) -> &mut [u8] {
        if index == 0 {
            return &mut self.direct;
        }
        match self.indirect.get_mut(index - 1) {
            Some(Some(block)) => block,
            _ => unreachable!("block {index} written before allocation"),
        }
    }

    /// Allocates the indirect blocks needed to address `end` bytes.
    fn ensure_capacity(&mut self, end: u64, limit: BlockLimit) -> StorageResult<()> {
        let required = end.div_ceil(BLOCK_SIZE_U64).max(1);
        limit.check(required)?;

        let indirect_needed = (required - 1) as usize;
        if self.indirect.len() < indirect_needed {
            self.indirect.resize_with(indirect_needed, || None);
        }
        for slot in &mut self.indirect[..indirect_needed] {
            if slot.is_none() {
                *slot = Some(new_block());
                self.allocated += 1;
            }
        }
        Ok(())
    }
}

fn new_block() -> Box<[u8]> {
    vec![0u8; BLOCK_SIZE].into_boxed_slice()
}

/// Splits `[position, position + len)` into per-block spans of
/// `(block, start_in_block, span_len, offset_in_request)`.
fn spans(position: u64, len: usize) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    let mut done = 0usize;
    std::iter::from_fn(move || {
        if done >= len {
            return None;
        }
        let at = position + done as u64;
        let block = (at / BLOCK_SIZE_U64) as usize;
        let start = (at % BLOCK_SIZE_U64) as usize;
        let span = (BLOCK_SIZE - start).min(len - done);
        let item = (block, start, span, done);
        done += span;
        Some(item)
    })
}

/// A growable in-memory byte container addressed by fixed-size blocks.
///
/// # Thread Safety
///
/// Reads, `size` and `transfer_to` take a shared lock; writes and `reset`
/// take the exclusive lock. Share it across threads behind an `Arc`.
#[derive(Debug)]
pub struct BlockStore {
    inner: RwLock<Blocks>,
    limit: BlockLimit,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore {
    /// Creates an empty store with the default block limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(BlockLimit::default())
    }

    /// Creates an empty store with the given block limit.
    #[must_use]
    pub fn with_limit(limit: BlockLimit) -> Self {
        Self {
            inner: RwLock::new(Blocks::new()),
            limit,
        }
    }

    /// Returns the configured block limit.
    #[must_use]
    pub fn limit(&self) -> BlockLimit {
        self.limit
    }

    /// Returns the logical length in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.read().size
    }

    /// Returns the number of indirect blocks currently allocated.
    #[must_use]
    pub fn blocks_allocated(&self) -> usize {
        self.inner.read().allocated
    }

    /// Reads up to `dst.len()` bytes starting at `position`.
    ///
    /// Returns the number of bytes copied; `0` means `position` is at or
    /// past the end (or `dst` is empty).
    pub fn read_at(&self, position: u64, dst: &mut [u8]) -> usize {
        let blocks = self.inner.read();
        if position >= blocks.size {
            return 0;
        }
        let len = dst.len().min((blocks.size - position) as usize);
        for (block, start, span, off) in spans(position, len) {
            dst[off..off + span].copy_from_slice(&blocks.block(block)[start..start + span]);
        }
        len
    }

    /// Writes `src` at `position`, growing the store as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CapacityExceeded`] if the write would need
    /// more blocks than the limit allows. Nothing is written in that case.
    pub fn write_at(&self, position: u64, src: &[u8]) -> StorageResult<usize> {
        let mut blocks = self.inner.write();
        Self::write_locked(&mut blocks, self.limit, position, src)
    }

    /// Appends `src` at the current end and returns the position written.
    ///
    /// # Errors
    ///
    /// Same as [`BlockStore::write_at`].
    pub fn append(&self, src: &[u8]) -> StorageResult<u64> {
        let mut blocks = self.inner.write();
        let position = blocks.size;
        Self::write_locked(&mut blocks, self.limit, position, src)?;
        Ok(position)
    }

    fn write_locked(
        blocks: &mut Blocks,
        limit: BlockLimit,
        position: u64,
        src: &[u8],
    ) -> StorageResult<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let end = position
            .checked_add(src.len() as u64)
            .ok_or(StorageError::CapacityExceeded {
                required: u64::MAX,
                limit: limit.max_blocks(),
            })?;
        blocks.ensure_capacity(end, limit)?;
        for (block, start, span, off) in spans(position, src.len()) {
            blocks.block_mut(block)[start..start + span].copy_from_slice(&src[off..off + span]);
        }
        blocks.size = blocks.size.max(end);
        Ok(src.len())
    }

    /// Copies everything from `position` to the end into `sink`.
    ///
    /// Returns the number of bytes transferred.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink fails.
    pub fn transfer_to<W: Write + ?Sized>(&self, sink: &mut W, position: u64) -> StorageResult<u64> {
        let blocks = self.inner.read();
        if position >= blocks.size {
            return Ok(0);
        }
        let len = (blocks.size - position) as usize;
        for (block, start, span, _) in spans(position, len) {
            sink.write_all(&blocks.block(block)[start..start + span])?;
        }
        Ok(len as u64)
    }

    /// Returns a copy of all bytes in the store.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        // Writing into a Vec cannot fail.
        let _ = self.transfer_to(&mut out, 0);
        out
    }

    /// Empties the store and releases its indirect blocks.
    pub fn reset(&self) {
        let mut blocks = self.inner.write();
        blocks.size = 0;
        blocks.indirect.clear();
        blocks.allocated = 0;
    }
}

/// A [`Read`] + [`Seek`] view over a shared [`BlockStore`].
///
/// The cursor is advanced with a compare-and-retry loop rather than a lock,
/// so one reader may be shared by several threads through `&BlockStoreReader`
/// without corrupting its position. A concurrent seek makes the racing read
/// retry against the new position.
#[derive(Debug)]
pub struct BlockStoreReader {
    store: Arc<BlockStore>,
    position: AtomicU64,
}

impl BlockStoreReader {
    /// Creates a reader positioned at the start of `store`.
    #[must_use]
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self {
            store,
            position: AtomicU64::new(0),
        }
    }

    /// Returns the current read position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Moves the cursor to `position`.
    pub fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Release);
    }

    /// Reads from the shared cursor.
    pub fn read_shared(&self, buf: &mut [u8]) -> usize {
        loop {
            let current = self.position.load(Ordering::Acquire);
            let n = self.store.read_at(current, buf);
            if n == 0 {
                return 0;
            }
            if self
                .position
                .compare_exchange(current, current + n as u64, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return n;
            }
        }
    }

    fn seek_shared(&self, pos: SeekFrom) -> io::Result<u64> {
        let base = match pos {
            SeekFrom::Start(p) => return Ok(self.commit_seek(p)),
            SeekFrom::End(delta) => (self.store.size(), delta),
            SeekFrom::Current(delta) => (self.position(), delta),
        };
        match base.0.checked_add_signed(base.1) {
            Some(p) => Ok(self.commit_seek(p)),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }

    fn commit_seek(&self, position: u64) -> u64 {
        self.set_position(position);
        position
    }
}

impl Read for BlockStoreReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_shared(buf))
    }
}

impl Read for &BlockStoreReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_shared(buf))
    }
}

impl Seek for BlockStoreReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_shared(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn new_store_is_empty() {
        let store = BlockStore::new();
        assert_eq!(store.size(), 0);
        assert_eq!(store.blocks_allocated(), 0);
        let mut buf = [0u8; 8];
        assert_eq!(store.read_at(0, &mut buf), 0);
    }

    #[test]
    fn small_write_stays_in_direct_block() {
        let store = BlockStore::new();
        assert_eq!(store.write_at(0, b"hello").unwrap(), 5);
        assert_eq!(store.size(), 5);
        assert_eq!(store.blocks_allocated(), 0);

        let mut buf = [0u8; 5];
        assert_eq!(store.read_at(0, &mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_spanning_blocks() {
        let store = BlockStore::new();
        let data = pattern(BLOCK_SIZE * 3 + 17);
        store.write_at(0, &data).unwrap();
        assert_eq!(store.size(), data.len() as u64);
        assert_eq!(store.blocks_allocated(), 3);
        assert_eq!(store.to_vec(), data);
    }

    #[test]
    fn read_straddling_block_boundary() {
        let store = BlockStore::new();
        let data = pattern(BLOCK_SIZE * 2);
        store.write_at(0, &data).unwrap();

        let mut buf = vec![0u8; 100];
        let position = BLOCK_SIZE as u64 - 50;
        assert_eq!(store.read_at(position, &mut buf), 100);
        assert_eq!(buf, data[BLOCK_SIZE - 50..BLOCK_SIZE + 50]);
    }

    #[test]
    fn read_is_clamped_to_size() {
        let store = BlockStore::new();
        store.write_at(0, b"abcdef").unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(store.read_at(4, &mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(store.read_at(6, &mut buf), 0);
        assert_eq!(store.read_at(600, &mut buf), 0);
    }

    #[test]
    fn overwrite_does_not_shrink() {
        let store = BlockStore::new();
        store.write_at(0, b"0123456789").unwrap();
        store.write_at(2, b"ab").unwrap();
        assert_eq!(store.size(), 10);
        assert_eq!(store.to_vec(), b"01ab456789");
    }

    #[test]
    fn write_past_end_extends_size() {
        let store = BlockStore::new();
        store.write_at(0, b"ab").unwrap();
        store.write_at(BLOCK_SIZE as u64 + 10, b"cd").unwrap();
        assert_eq!(store.size(), BLOCK_SIZE as u64 + 12);

        let mut buf = [0u8; 2];
        store.read_at(BLOCK_SIZE as u64 + 10, &mut buf);
        assert_eq!(&buf, b"cd");
    }

    #[test]
    fn append_returns_previous_end() {
        let store = BlockStore::new();
        assert_eq!(store.append(b"hello").unwrap(), 0);
        assert_eq!(store.append(b" world").unwrap(), 5);
        assert_eq!(store.to_vec(), b"hello world");
    }

    #[test]
    fn empty_write_is_noop() {
        let store = BlockStore::new();
        assert_eq!(store.write_at(100, b"").unwrap(), 0);
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn limit_is_enforced() {
        let store = BlockStore::with_limit(BlockLimit::Blocks(2));
        store.write_at(0, &pattern(BLOCK_SIZE * 2)).unwrap();

        let result = store.append(b"x");
        assert!(matches!(
            result,
            Err(StorageError::CapacityExceeded {
                required: 3,
                limit: 2
            })
        ));
        assert_eq!(store.size(), BLOCK_SIZE as u64 * 2);
    }

    #[test]
    fn unbounded_limit_passes_classic_ceiling() {
        let store = BlockStore::with_limit(BlockLimit::Unbounded);
        let position = BLOCK_SIZE as u64 * BLOCK_SIZE as u64;
        store.write_at(position, b"beyond").unwrap();
        assert_eq!(store.size(), position + 6);
    }

    #[test]
    fn write_past_addressable_end_is_rejected() {
        let store = BlockStore::with_limit(BlockLimit::Unbounded);
        assert!(matches!(
            store.write_at(u64::MAX - 2, b"abcdef"),
            Err(StorageError::CapacityExceeded {
                required: u64::MAX,
                limit: u64::MAX
            })
        ));
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn default_limit_is_classic_ceiling() {
        let store = BlockStore::new();
        let position = BLOCK_SIZE as u64 * BLOCK_SIZE as u64;
        assert!(store.write_at(position - 1, b"x").is_ok());
        assert!(matches!(
            store.write_at(position, b"x"),
            Err(StorageError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn limit_for_bytes_rounds_up() {
        assert_eq!(BlockLimit::for_bytes(0), BlockLimit::Blocks(1));
        assert_eq!(BlockLimit::for_bytes(1), BlockLimit::Blocks(1));
        assert_eq!(
            BlockLimit::for_bytes(BLOCK_SIZE as u64 + 1),
            BlockLimit::Blocks(2)
        );
    }

    #[test]
    fn transfer_from_position() {
        let store = BlockStore::new();
        let data = pattern(BLOCK_SIZE + 300);
        store.write_at(0, &data).unwrap();

        let mut sink = Vec::new();
        let n = store.transfer_to(&mut sink, 200).unwrap();
        assert_eq!(n, data.len() as u64 - 200);
        assert_eq!(sink, data[200..]);

        let mut empty = Vec::new();
        assert_eq!(store.transfer_to(&mut empty, 10_000).unwrap(), 0);
    }

    #[test]
    fn reset_releases_blocks() {
        let store = BlockStore::new();
        store.write_at(0, &pattern(BLOCK_SIZE * 4)).unwrap();
        assert_eq!(store.blocks_allocated(), 3);

        store.reset();
        assert_eq!(store.size(), 0);
        assert_eq!(store.blocks_allocated(), 0);

        store.append(b"again").unwrap();
        assert_eq!(store.to_vec(), b"again");
    }

    #[test]
    fn reader_reads_and_seeks() {
        let store = Arc::new(BlockStore::new());
        store.write_at(0, &pattern(BLOCK_SIZE + 10)).unwrap();

        let mut reader = BlockStoreReader::new(Arc::clone(&store));
        let mut all = Vec::new();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all, pattern(BLOCK_SIZE + 10));

        reader.seek(SeekFrom::End(-4)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &pattern(BLOCK_SIZE + 10)[BLOCK_SIZE + 6..]);

        assert!(reader.seek(SeekFrom::Current(-100_000)).is_err());
    }

    #[test]
    fn shared_reader_hands_out_each_byte_once() {
        let data = pattern(BLOCK_SIZE * 8);
        let store = Arc::new(BlockStore::with_limit(BlockLimit::Unbounded));
        store.write_at(0, &data).unwrap();
        let reader = Arc::new(BlockStoreReader::new(store));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = Arc::clone(&reader);
                thread::spawn(move || {
                    let mut total = 0usize;
                    let mut buf = [0u8; 97];
                    loop {
                        let n = reader.read_shared(&mut buf);
                        if n == 0 {
                            break total;
                        }
                        total += n;
                    }
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, data.len());
        assert_eq!(reader.position(), data.len() as u64);
    }

    proptest! {
        #[test]
        fn matches_vec_model(
            writes in prop::collection::vec(
                (0u64..(BLOCK_SIZE as u64 * 3), prop::collection::vec(any::<u8>(), 1..600)),
                1..20,
            )
        ) {
            let store = BlockStore::new();
            let mut model: Vec<u8> = Vec::new();

            for (position, data) in &writes {
                store.write_at(*position, data).unwrap();
                let end = *position as usize + data.len();
                if model.len() < end {
                    model.resize(end, 0);
                }
                model[*position as usize..end].copy_from_slice(data);
            }

            prop_assert_eq!(store.size(), model.len() as u64);

            // Gap bytes are unspecified, so compare only bytes that were written.
            let mut written = vec![false; model.len()];
            for (position, data) in &writes {
                for flag in &mut written[*position as usize..*position as usize + data.len()] {
                    *flag = true;
                }
            }
            let actual = store.to_vec();
            for (i, was_written) in written.iter().enumerate() {
                if *was_written {
                    prop_assert_eq!(actual[i], model[i]);
                }
            }
        }
    }
}
