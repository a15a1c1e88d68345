//! Pooled content: payloads that live in memory until they grow too large.
//!
//! [`ContentFile`] is the narrow interface collaborators use to stage
//! document or binary payloads. [`VirtualContentBuffer`] is the main
//! implementation: it writes into a [`BlockStore`] and moves to a temporary
//! file obtained from the [`TempFileAuthority`] once the in-memory budget is
//! used up.

use crate::block::{BlockLimit, BlockStore, BlockStoreReader};
use crate::error::{StorageError, StorageResult};
use crate::overflow::OverflowWriter;
use crate::temp::TempFileAuthority;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A staged payload that can be read back any number of times.
pub trait ContentFile: Send + Sync + fmt::Debug {
    /// Returns the payload length in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Returns a copy of the whole payload.
    fn get_bytes(&self) -> StorageResult<Vec<u8>>;

    /// Opens a reader positioned at the start of the payload.
    fn new_input_stream(&self) -> StorageResult<Box<dyn Read + Send>>;

    /// Opens a writer appending to the payload.
    ///
    /// # Errors
    ///
    /// Read-only implementations return [`StorageError::Unsupported`].
    fn new_output_stream(&self) -> StorageResult<Box<dyn Write + Send>>;

    /// Releases memory and backing files. The content is empty afterwards.
    fn close(&self) -> StorageResult<()>;
}

#[derive(Debug)]
enum Content {
    Empty,
    InMemory(Arc<BlockStore>),
    Spilled(PathBuf),
}

#[derive(Debug)]
struct Shared {
    in_memory_size: u64,
    authority: Arc<TempFileAuthority>,
    state: RwLock<Content>,
}

impl Shared {
    fn release(&self, content: Content) {
        match content {
            Content::Spilled(path) => {
                self.authority.return_temporary_file(&path);
            }
            Content::InMemory(store) => store.reset(),
            Content::Empty => {}
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let content = std::mem::replace(self.state.get_mut(), Content::Empty);
        self.release(content);
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Content that stays in memory up to a budget and spills to a temporary
/// file beyond it.
///
/// The memory → disk transition happens at most once between two
/// [`close`](ContentFile::close) calls and runs entirely under the exclusive
/// lock, so `size`, `read_all` and `new_reader` never see a half-migrated
/// buffer. Only one writer should be open at a time; readers opened while a
/// writer is still buffering see the bytes written so far.
///
/// # Example
///
/// ```rust,no_run
/// use std::io::{Read, Write};
/// use std::sync::Arc;
/// use xspool_storage::{TempFileAuthority, VirtualContentBuffer};
///
/// let authority = Arc::new(TempFileAuthority::open_default()?);
/// let buffer = VirtualContentBuffer::new(authority, 64 * 1024);
///
/// let mut writer = buffer.new_writer()?;
/// writer.write_all(b"<doc/>")?;
/// writer.finish()?;
///
/// let mut text = String::new();
/// buffer.new_reader()?.read_to_string(&mut text)?;
/// assert_eq!(text, "<doc/>");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct VirtualContentBuffer {
    shared: Arc<Shared>,
}

impl fmt::Debug for VirtualContentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualContentBuffer")
            .field("in_memory_size", &self.shared.in_memory_size)
            .field("state", &*self.shared.state.read())
            .finish()
    }
}

impl VirtualContentBuffer {
    /// Creates an empty buffer that spills past `in_memory_size` bytes.
    ///
    /// A budget of `0` makes every writer go straight to disk.
    #[must_use]
    pub fn new(authority: Arc<TempFileAuthority>, in_memory_size: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                in_memory_size,
                authority,
                state: RwLock::new(Content::Empty),
            }),
        }
    }

    /// Returns the in-memory budget.
    #[must_use]
    pub fn in_memory_size(&self) -> u64 {
        self.shared.in_memory_size
    }

    /// Returns `true` if no writer still refers to this buffer.
    pub(crate) fn is_exclusive(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }

    /// Returns `true` if the content lives in a temporary file.
    #[must_use]
    pub fn is_spilled(&self) -> bool {
        matches!(*self.shared.state.read(), Content::Spilled(_))
    }

    /// Returns the backing file, if the content has spilled.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.shared.state.read() {
            Content::Spilled(path) => Some(path.clone()),
            _ => None,
        }
    }

    /// Opens a writer that appends to the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the budget is `0` and no temporary file can be
    /// created, or if an existing backing file cannot be reopened.
    pub fn new_writer(&self) -> StorageResult<ContentWriter> {
        let mut state = self.shared.state.write();

        if let Content::Spilled(path) = &*state {
            let sink = open_append(path)?;
            return Ok(ContentWriter::file(Arc::clone(&self.shared), sink));
        }

        if self.shared.in_memory_size == 0 {
            let path = self.shared.authority.get_temporary_file()?;
            let sink = match open_append(&path) {
                Ok(sink) => sink,
                Err(e) => {
                    self.shared.authority.return_temporary_file(&path);
                    return Err(e.into());
                }
            };
            let previous = std::mem::replace(&mut *state, Content::Spilled(path));
            self.shared.release(previous);
            debug!("content buffer writing straight to disk");
            return Ok(ContentWriter::file(Arc::clone(&self.shared), sink));
        }

        Ok(ContentWriter {
            shared: Arc::clone(&self.shared),
            mode: WriterMode::Pending,
            spilled_to: Arc::new(Mutex::new(None)),
        })
    }

    /// Opens a reader positioned at the start of the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be opened.
    pub fn new_reader(&self) -> StorageResult<ContentReader> {
        let state = self.shared.state.read();
        Ok(match &*state {
            Content::Spilled(path) => ContentReader::File(BufReader::new(File::open(path)?)),
            Content::InMemory(store) => {
                ContentReader::Memory(BlockStoreReader::new(Arc::clone(store)))
            }
            Content::Empty => ContentReader::Empty,
        })
    }

    /// Returns the content length in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be inspected.
    pub fn size(&self) -> StorageResult<u64> {
        let state = self.shared.state.read();
        Ok(match &*state {
            Content::Spilled(path) => fs::metadata(path)?.len(),
            Content::InMemory(store) => store.size(),
            Content::Empty => 0,
        })
    }

    /// Returns a copy of the whole content.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read.
    pub fn read_all(&self) -> StorageResult<Vec<u8>> {
        let state = self.shared.state.read();
        Ok(match &*state {
            Content::Spilled(path) => fs::read(path)?,
            Content::InMemory(store) => store.to_vec(),
            Content::Empty => Vec::new(),
        })
    }

    /// Returns the backing file to the authority and drops buffered bytes.
    ///
    /// The buffer is reusable afterwards, exactly as if newly constructed.
    pub fn close(&self) {
        let mut state = self.shared.state.write();
        let previous = std::mem::replace(&mut *state, Content::Empty);
        self.shared.release(previous);
    }
}

impl ContentFile for VirtualContentBuffer {
    fn size(&self) -> StorageResult<u64> {
        VirtualContentBuffer::size(self)
    }

    fn get_bytes(&self) -> StorageResult<Vec<u8>> {
        self.read_all()
    }

    fn new_input_stream(&self) -> StorageResult<Box<dyn Read + Send>> {
        Ok(Box::new(self.new_reader()?))
    }

    fn new_output_stream(&self) -> StorageResult<Box<dyn Write + Send>> {
        Ok(Box::new(self.new_writer()?))
    }

    fn close(&self) -> StorageResult<()> {
        VirtualContentBuffer::close(self);
        Ok(())
    }
}

type SpillFactory = Box<dyn FnOnce() -> io::Result<BufWriter<File>> + Send>;

enum WriterMode {
    Pending,
    Memory(OverflowWriter<SpillFactory, BufWriter<File>>),
    File(BufWriter<File>),
}

/// Writer returned by [`VirtualContentBuffer::new_writer`].
///
/// Dropping the writer flushes it; call [`ContentWriter::finish`] to see
/// flush errors.
pub struct ContentWriter {
    shared: Arc<Shared>,
    mode: WriterMode,
    spilled_to: Arc<Mutex<Option<PathBuf>>>,
}

impl fmt::Debug for ContentWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.mode {
            WriterMode::Pending => "pending",
            WriterMode::Memory(_) => "memory",
            WriterMode::File(_) => "file",
        };
        f.debug_struct("ContentWriter").field("mode", &mode).finish()
    }
}

impl ContentWriter {
    fn file(shared: Arc<Shared>, sink: BufWriter<File>) -> Self {
        Self {
            shared,
            mode: WriterMode::File(sink),
            spilled_to: Arc::new(Mutex::new(None)),
        }
    }

    /// Flushes buffered bytes to the backing file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn finish(mut self) -> StorageResult<()> {
        self.flush()?;
        Ok(())
    }

    /// Binds the writer to the buffer's block store, creating it on first use.
    fn start(&mut self) -> io::Result<()> {
        let mut state = self.shared.state.write();
        let store = match &*state {
            Content::Spilled(path) => {
                self.mode = WriterMode::File(open_append(path)?);
                return Ok(());
            }
            Content::InMemory(store) => Arc::clone(store),
            Content::Empty => {
                let limit = BlockLimit::for_bytes(self.shared.in_memory_size);
                let store = Arc::new(BlockStore::with_limit(limit));
                *state = Content::InMemory(Arc::clone(&store));
                store
            }
        };

        let authority = Arc::clone(&self.shared.authority);
        let slot = Arc::clone(&self.spilled_to);
        let factory: SpillFactory = Box::new(move || {
            let path = authority.get_temporary_file()?;
            match open_append(&path) {
                Ok(sink) => {
                    *slot.lock() = Some(path);
                    Ok(sink)
                }
                Err(e) => {
                    authority.return_temporary_file(&path);
                    Err(e)
                }
            }
        });
        self.mode = WriterMode::Memory(OverflowWriter::new(
            self.shared.in_memory_size,
            store,
            factory,
        ));
        Ok(())
    }
}

impl Write for ContentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if matches!(self.mode, WriterMode::Pending) {
            self.start()?;
        }
        match &mut self.mode {
            WriterMode::File(sink) => sink.write(buf),
            WriterMode::Memory(writer) if writer.would_spill(buf.len()) => {
                // The whole migration runs under the exclusive lock.
                let mut state = self.shared.state.write();
                let written = writer.write(buf).and_then(|n| {
                    // Readers open the file by path, so the drained bytes
                    // must be on disk before the path is published.
                    if writer.is_overflowed() {
                        writer.flush()?;
                    }
                    Ok(n)
                });
                // Publish even on error so the file is still returned.
                if let Some(path) = self.spilled_to.lock().take() {
                    *state = Content::Spilled(path);
                }
                written
            }
            WriterMode::Memory(writer) => writer.write(buf),
            WriterMode::Pending => unreachable!("writer started above"),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.mode {
            WriterMode::File(sink) => sink.flush(),
            WriterMode::Memory(writer) => writer.flush(),
            WriterMode::Pending => Ok(()),
        }
    }
}

/// Reader returned by [`VirtualContentBuffer::new_reader`].
#[derive(Debug)]
pub enum ContentReader {
    /// Content spilled to a temporary file.
    File(BufReader<File>),
    /// Content held in a block store.
    Memory(BlockStoreReader),
    /// Nothing was ever written.
    Empty,
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(reader) => reader.read(buf),
            Self::Memory(reader) => reader.read(buf),
            Self::Empty => Ok(0),
        }
    }
}

/// Immutable in-memory content.
#[derive(Debug, Clone)]
pub struct BytesContent {
    data: Bytes,
}

impl BytesContent {
    /// Wraps `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ContentFile for BytesContent {
    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn get_bytes(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.to_vec())
    }

    fn new_input_stream(&self) -> StorageResult<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }

    fn new_output_stream(&self) -> StorageResult<Box<dyn Write + Send>> {
        Err(StorageError::Unsupported("bytes content is read-only"))
    }

    fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// An existing file exposed read-only. The file is not owned and is never
/// deleted.
#[derive(Debug, Clone)]
pub struct PathContent {
    path: PathBuf,
}

impl PathContent {
    /// Wraps the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the wrapped path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentFile for PathContent {
    fn size(&self) -> StorageResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn get_bytes(&self) -> StorageResult<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    fn new_input_stream(&self) -> StorageResult<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }

    fn new_output_stream(&self) -> StorageResult<Box<dyn Write + Send>> {
        Err(StorageError::Unsupported("path content is read-only"))
    }

    fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;
    use proptest::prelude::*;
    use tempfile::{tempdir, TempDir};

    fn authority() -> (TempDir, Arc<TempFileAuthority>) {
        let root = tempdir().unwrap();
        let authority = Arc::new(TempFileAuthority::open(root.path()).unwrap());
        (root, authority)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn write_chunks(buffer: &VirtualContentBuffer, data: &[u8], chunk: usize) {
        let mut writer = buffer.new_writer().unwrap();
        for part in data.chunks(chunk.max(1)) {
            writer.write_all(part).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_back(buffer: &VirtualContentBuffer) -> Vec<u8> {
        let mut out = Vec::new();
        buffer.new_reader().unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn empty_buffer_reads_nothing() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(authority, 1024);
        assert_eq!(buffer.size().unwrap(), 0);
        assert!(buffer.read_all().unwrap().is_empty());
        assert!(matches!(buffer.new_reader().unwrap(), ContentReader::Empty));
    }

    #[test]
    fn small_content_stays_in_memory() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(Arc::clone(&authority), 1024);

        write_chunks(&buffer, b"<a>hello</a>", 4);

        assert!(!buffer.is_spilled());
        assert_eq!(authority.outstanding(), 0);
        assert_eq!(buffer.size().unwrap(), 12);
        assert_eq!(read_back(&buffer), b"<a>hello</a>");
    }

    #[test]
    fn large_content_spills_to_disk() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(Arc::clone(&authority), 1000);
        let data = pattern(5000);

        write_chunks(&buffer, &data, 333);

        assert!(buffer.is_spilled());
        let path = buffer.path().unwrap();
        assert!(path.starts_with(authority.scratch_dir()));
        assert_eq!(buffer.size().unwrap(), 5000);
        assert_eq!(buffer.read_all().unwrap(), data);
        assert_eq!(read_back(&buffer), data);
    }

    #[test]
    fn threshold_minus_one_then_one_spills_exactly_once() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(Arc::clone(&authority), 100);

        let mut writer = buffer.new_writer().unwrap();
        writer.write_all(&pattern(99)).unwrap();
        assert!(!buffer.is_spilled());
        assert_eq!(authority.outstanding(), 0);

        writer.write_all(b"!").unwrap();
        assert!(buffer.is_spilled());
        assert_eq!(authority.outstanding(), 1);

        writer.write_all(b"more").unwrap();
        writer.finish().unwrap();
        assert_eq!(authority.outstanding(), 1);
        assert_eq!(buffer.size().unwrap(), 104);
    }

    #[test]
    fn spilled_bytes_are_visible_before_finish() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(authority, 100);
        let data = pattern(100);

        let mut writer = buffer.new_writer().unwrap();
        writer.write_all(&data[..99]).unwrap();
        assert_eq!(buffer.size().unwrap(), 99);

        writer.write_all(&data[99..]).unwrap();
        assert!(buffer.is_spilled());
        assert_eq!(buffer.size().unwrap(), 100);
        assert_eq!(buffer.read_all().unwrap(), data);
        assert_eq!(read_back(&buffer), data);
        writer.finish().unwrap();
    }

    #[test]
    fn single_write_of_threshold_spills() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(authority, 64);
        write_chunks(&buffer, &pattern(64), 64);
        assert!(buffer.is_spilled());
        assert_eq!(read_back(&buffer), pattern(64));
    }

    #[test]
    fn zero_budget_spills_immediately() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(Arc::clone(&authority), 0);

        let writer = buffer.new_writer().unwrap();
        assert!(buffer.is_spilled());
        assert_eq!(buffer.size().unwrap(), 0);
        drop(writer);

        write_chunks(&buffer, b"direct", 2);
        assert_eq!(buffer.read_all().unwrap(), b"direct");
    }

    #[test]
    fn second_writer_appends() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(authority, 10);

        write_chunks(&buffer, b"12345", 5);
        write_chunks(&buffer, b"678", 3);
        assert!(!buffer.is_spilled());

        // Counts the five bytes already buffered, so this crosses the budget.
        write_chunks(&buffer, b"90abc", 5);
        assert!(buffer.is_spilled());
        assert_eq!(buffer.read_all().unwrap(), b"1234567890abc");

        write_chunks(&buffer, b"def", 1);
        assert_eq!(buffer.read_all().unwrap(), b"1234567890abcdef");
    }

    #[test]
    fn close_returns_file_and_allows_reuse() {
        let (_root, authority) = authority();
        let buffer = VirtualContentBuffer::new(Arc::clone(&authority), 16);

        write_chunks(&buffer, &pattern(100), 10);
        let path = buffer.path().unwrap();

        buffer.close();
        assert!(!path.exists());
        assert_eq!(authority.outstanding(), 0);
        assert_eq!(buffer.size().unwrap(), 0);
        assert!(!buffer.is_spilled());

        write_chunks(&buffer, b"fresh", 5);
        assert!(!buffer.is_spilled());
        assert_eq!(buffer.read_all().unwrap(), b"fresh");
    }

    #[test]
    fn dropping_last_handle_returns_file() {
        let (_root, authority) = authority();
        let path = {
            let buffer = VirtualContentBuffer::new(Arc::clone(&authority), 4);
            write_chunks(&buffer, b"spilled!", 8);
            buffer.path().unwrap()
        };
        assert!(!path.exists());
        assert_eq!(authority.outstanding(), 0);
    }

    #[test]
    fn budget_past_classic_block_ceiling() {
        let (_root, authority) = authority();
        let budget = (BLOCK_SIZE * BLOCK_SIZE + BLOCK_SIZE) as u64;
        let buffer = VirtualContentBuffer::new(authority, budget);
        let data = pattern(BLOCK_SIZE * 3);
        write_chunks(&buffer, &data, BLOCK_SIZE);
        assert!(!buffer.is_spilled());
        assert_eq!(buffer.read_all().unwrap(), data);
    }

    #[test]
    fn content_file_trait_object() {
        let (_root, authority) = authority();
        let content: Box<dyn ContentFile> =
            Box::new(VirtualContentBuffer::new(authority, 8));

        content
            .new_output_stream()
            .unwrap()
            .write_all(b"through the trait")
            .unwrap();
        assert_eq!(content.size().unwrap(), 17);
        assert_eq!(content.get_bytes().unwrap(), b"through the trait");

        let mut text = String::new();
        content
            .new_input_stream()
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "through the trait");

        content.close().unwrap();
        assert_eq!(content.size().unwrap(), 0);
    }

    #[test]
    fn bytes_content_is_read_only() {
        let content = BytesContent::new(&b"static"[..]);
        assert_eq!(content.size().unwrap(), 6);
        assert_eq!(content.get_bytes().unwrap(), b"static");
        assert!(matches!(
            content.new_output_stream(),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn path_content_reads_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.xml");
        fs::write(&path, b"<doc/>").unwrap();

        let content = PathContent::new(&path);
        assert_eq!(content.size().unwrap(), 6);
        let mut out = Vec::new();
        content.new_input_stream().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"<doc/>");
        assert!(content.new_output_stream().is_err());

        content.close().unwrap();
        assert!(path.exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn roundtrip_any_chunking(
            data in prop::collection::vec(any::<u8>(), 0..3000),
            chunk in 1usize..700,
            budget in 1u64..2000,
        ) {
            let (_root, authority) = authority();
            let buffer = VirtualContentBuffer::new(Arc::clone(&authority), budget);
            write_chunks(&buffer, &data, chunk);

            prop_assert_eq!(buffer.is_spilled(), data.len() as u64 >= budget);
            prop_assert_eq!(buffer.size().unwrap(), data.len() as u64);
            prop_assert_eq!(read_back(&buffer), data);
        }
    }
}
