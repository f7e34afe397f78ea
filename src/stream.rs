//! Host byte streams and the adapters the codec reads and writes through.
//!
//! [`Source`] and [`Target`] are the host side: cheap reference-counted
//! handles over a memory map, an in-memory buffer or an arbitrary reader or
//! writer. [`StreamSource`], [`CodestreamSource`] and [`StreamTarget`] are
//! the codec side. Each adapter holds a strong reference to its host stream
//! until it is closed or dropped.

use crate::error::{BridgeError, Result};
use bitflags::bitflags;
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

bitflags! {
    /// What a source supports beyond forward reads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        /// Arbitrary seeks succeed.
        const SEEKABLE = 0x0001;
        /// Total length is known up front.
        const LENGTH_KNOWN = 0x0002;
        /// Bytes are addressable in memory (buffer or memory map).
        const MAPPED = 0x0004;
    }
}

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

enum ReaderKind {
    Sequential(Box<dyn Read + Send>),
    Seekable(Box<dyn ReadSeek>),
}

struct ReaderState {
    reader: ReaderKind,
    position: u64,
    // Sequential readers keep the sniffed prefix so it can be read again.
    prefix: Vec<u8>,
    length: Option<u64>,
}

impl ReaderState {
    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.reader {
            ReaderKind::Seekable(reader) => {
                if self.position != position {
                    self.position = reader.seek(SeekFrom::Start(position))?;
                }
                let n = reader.read(buf)?;
                self.position += n as u64;
                Ok(n)
            }
            ReaderKind::Sequential(reader) => {
                if position < self.prefix.len() as u64 {
                    let start = position as usize;
                    let n = buf.len().min(self.prefix.len() - start);
                    buf[..n].copy_from_slice(&self.prefix[start..start + n]);
                    return Ok(n);
                }
                if position < self.position {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "backward seek on a sequential stream",
                    ));
                }
                // Forward gaps are skipped by reading and discarding.
                let mut skip = position - self.position;
                let mut scratch = [0u8; 4096];
                while skip > 0 {
                    let chunk = skip.min(scratch.len() as u64) as usize;
                    let n = reader.read(&mut scratch[..chunk])?;
                    if n == 0 {
                        return Ok(0);
                    }
                    self.position += n as u64;
                    skip -= n as u64;
                }
                let n = reader.read(buf)?;
                self.position += n as u64;
                Ok(n)
            }
        }
    }

    fn sniff(&mut self, n: usize) -> io::Result<Vec<u8>> {
        match &mut self.reader {
            ReaderKind::Seekable(_) => {
                let mut out = vec![0u8; n];
                let mut filled = 0;
                while filled < n {
                    let got = self.read_at(filled as u64, &mut out[filled..])?;
                    if got == 0 {
                        break;
                    }
                    filled += got;
                }
                out.truncate(filled);
                Ok(out)
            }
            ReaderKind::Sequential(reader) => {
                if self.prefix.len() < n && self.position == self.prefix.len() as u64 {
                    let mut more = vec![0u8; n - self.prefix.len()];
                    let mut filled = 0;
                    while filled < more.len() {
                        let got = reader.read(&mut more[filled..])?;
                        if got == 0 {
                            break;
                        }
                        filled += got;
                    }
                    more.truncate(filled);
                    self.position += filled as u64;
                    self.prefix.extend_from_slice(&more);
                }
                Ok(self.prefix[..n.min(self.prefix.len())].to_vec())
            }
        }
    }
}

enum Backing {
    Memory(Arc<[u8]>),
    Mapped(Mmap),
    Reader(Mutex<ReaderState>),
}

struct SourceShared {
    backing: Backing,
    filename: Option<PathBuf>,
}

/// A readable host stream. Clones share the same underlying bytes.
#[derive(Clone)]
pub struct Source {
    shared: Arc<SourceShared>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("filename", &self.shared.filename)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

impl Source {
    /// Memory-map `path`.
    pub fn new_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // The file is assumed not to change underneath the map while loading.
        let map = unsafe { Mmap::map(&file)? };
        debug!(path = %path.display(), bytes = map.len(), "mapped source file");
        Ok(Self {
            shared: Arc::new(SourceShared {
                backing: Backing::Mapped(map),
                filename: Some(path.to_path_buf()),
            }),
        })
    }

    pub fn new_from_memory(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            shared: Arc::new(SourceShared {
                backing: Backing::Memory(data.into()),
                filename: None,
            }),
        }
    }

    /// A forward-only source. Only the sniffed prefix can be re-read.
    pub fn new_from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::from_reader_kind(ReaderKind::Sequential(Box::new(reader)), None)
    }

    pub fn new_from_seekable<R: Read + Seek + Send + 'static>(mut reader: R) -> Result<Self> {
        let length = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self::from_reader_kind(
            ReaderKind::Seekable(Box::new(reader)),
            Some(length),
        ))
    }

    fn from_reader_kind(reader: ReaderKind, length: Option<u64>) -> Self {
        Self {
            shared: Arc::new(SourceShared {
                backing: Backing::Reader(Mutex::new(ReaderState {
                    reader,
                    position: 0,
                    prefix: Vec::new(),
                    length,
                })),
                filename: None,
            }),
        }
    }

    pub fn filename(&self) -> Option<&Path> {
        self.shared.filename.as_deref()
    }

    pub fn capabilities(&self) -> Capabilities {
        match &self.shared.backing {
            Backing::Memory(_) | Backing::Mapped(_) => {
                Capabilities::SEEKABLE | Capabilities::LENGTH_KNOWN | Capabilities::MAPPED
            }
            Backing::Reader(state) => match state.lock().reader {
                ReaderKind::Seekable(_) => Capabilities::SEEKABLE | Capabilities::LENGTH_KNOWN,
                ReaderKind::Sequential(_) => Capabilities::empty(),
            },
        }
    }

    pub fn len(&self) -> Option<u64> {
        match &self.shared.backing {
            Backing::Memory(data) => Some(data.len() as u64),
            Backing::Mapped(map) => Some(map.len() as u64),
            Backing::Reader(state) => state.lock().length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Number of live handles, adapters included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Up to `n` bytes from the start of the stream, without consuming them.
    pub fn sniff(&self, n: usize) -> Result<Vec<u8>> {
        match &self.shared.backing {
            Backing::Memory(data) => Ok(data[..n.min(data.len())].to_vec()),
            Backing::Mapped(map) => Ok(map[..n.min(map.len())].to_vec()),
            Backing::Reader(state) => Ok(state.lock().sniff(n)?),
        }
    }

    fn read_at(&self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        let bytes: &[u8] = match &self.shared.backing {
            Backing::Memory(data) => data,
            Backing::Mapped(map) => map,
            Backing::Reader(state) => return state.lock().read_at(position, buf),
        };
        if position >= bytes.len() as u64 {
            return Ok(0);
        }
        let start = position as usize;
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }
}

/// The codec's view of a [`Source`]: read, seek, position, rewind, close.
pub struct StreamSource {
    source: Option<Source>,
    position: u64,
}

impl StreamSource {
    pub fn new(source: &Source) -> Self {
        Self {
            source: Some(source.clone()),
            position: 0,
        }
    }

    fn source(&self) -> Result<&Source> {
        self.source.as_ref().ok_or(BridgeError::StreamClosed)
    }

    /// Read up to `buf.len()` bytes. Zero means end of stream; a shorter
    /// count is a partial read and the caller may try again.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.source()?.read_at(self.position, buf)?;
        self.position += n as u64;
        trace!(requested = buf.len(), read = n, "stream read");
        Ok(n)
    }

    /// Move to a new position. A failed seek leaves the position unchanged.
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        let source = self.source()?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => source.len().and_then(|len| len.checked_add_signed(delta)),
        };
        let Some(target) = target else {
            debug!(?pos, "seek failed");
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek out of range or stream length unknown",
            )));
        };
        if target < self.position && !source.capabilities().contains(Capabilities::SEEKABLE) {
            // Sequential sources can only revisit their sniffed prefix.
            let mut probe = [0u8; 1];
            if source.read_at(target, &mut probe).is_err() {
                debug!(target, "backward seek on sequential stream refused");
                return Err(BridgeError::Io(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream is not seekable",
                )));
            }
        }
        self.position = target;
        Ok(target)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.seek_to(SeekFrom::Start(0)).map(|_| ())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.source
            .as_ref()
            .map(Source::capabilities)
            .unwrap_or_default()
    }

    pub fn len(&self) -> Option<u64> {
        self.source.as_ref().and_then(Source::len)
    }

    /// Release the strong reference on the host stream.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            trace!("stream source closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }
}

fn to_io(err: BridgeError) -> io::Error {
    match err {
        BridgeError::Io(inner) => inner,
        other => io::Error::other(other),
    }
}

impl Read for StreamSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(buf).map_err(to_io)
    }
}

impl Seek for StreamSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_to(pos).map_err(to_io)
    }
}

/// A window over the contiguous codestream box of a container.
pub struct CodestreamSource {
    inner: StreamSource,
    start: u64,
    length: Option<u64>,
    position: u64,
}

impl CodestreamSource {
    /// `length` of `None` runs to the end of the stream.
    pub fn new(inner: StreamSource, start: u64, length: Option<u64>) -> Self {
        Self {
            inner,
            start,
            length,
            position: 0,
        }
    }

    pub fn len(&self) -> Option<u64> {
        self.length.or_else(|| {
            self.inner
                .len()
                .map(|total| total.saturating_sub(self.start))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl Read for CodestreamSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = match self.length {
            Some(length) => {
                let left = length.saturating_sub(self.position);
                buf.len().min(usize::try_from(left).unwrap_or(usize::MAX))
            }
            None => buf.len(),
        };
        if want == 0 {
            return Ok(0);
        }
        self.inner.seek(SeekFrom::Start(self.start + self.position))?;
        let n = self.inner.read(&mut buf[..want])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for CodestreamSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len().and_then(|len| len.checked_add_signed(delta)),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek outside codestream")
        })?;
        self.position = target;
        Ok(target)
    }
}

enum TargetSink {
    File(BufWriter<File>),
    Memory(Vec<u8>),
    Writer(Box<dyn Write + Send>),
}

struct TargetState {
    sink: TargetSink,
    ended: bool,
    written: u64,
    blob: Option<Vec<u8>>,
}

/// A writable host stream. Clones share the same sink.
#[derive(Clone)]
pub struct Target {
    shared: Arc<Mutex<TargetState>>,
    filename: Option<Arc<Path>>,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Target")
            .field("filename", &self.filename)
            .field("written", &state.written)
            .field("ended", &state.ended)
            .finish()
    }
}

impl Target {
    fn with_sink(sink: TargetSink) -> Self {
        Self {
            shared: Arc::new(Mutex::new(TargetState {
                sink,
                ended: false,
                written: 0,
                blob: None,
            })),
            filename: None,
        }
    }

    pub fn new_to_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut target = Self::with_sink(TargetSink::File(BufWriter::new(file)));
        target.filename = Some(Arc::from(path));
        Ok(target)
    }

    pub fn new_to_memory() -> Self {
        Self::with_sink(TargetSink::Memory(Vec::new()))
    }

    pub fn new_to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self::with_sink(TargetSink::Writer(Box::new(writer)))
    }

    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        if state.ended {
            return Err(BridgeError::StreamClosed);
        }
        match &mut state.sink {
            TargetSink::File(file) => file.write_all(bytes)?,
            TargetSink::Memory(buffer) => buffer.extend_from_slice(bytes),
            TargetSink::Writer(writer) => writer.write_all(bytes)?,
        }
        state.written += bytes.len() as u64;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.lock();
        match &mut state.sink {
            TargetSink::File(file) => file.flush()?,
            TargetSink::Memory(_) => {}
            TargetSink::Writer(writer) => writer.flush()?,
        }
        Ok(())
    }

    /// Flush and finalise. Memory targets move their bytes into the blob.
    pub fn end(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.ended {
            return Ok(());
        }
        match &mut state.sink {
            TargetSink::File(file) => {
                file.flush()?;
                file.get_ref().sync_all()?;
            }
            TargetSink::Memory(buffer) => {
                let bytes = std::mem::take(buffer);
                state.blob = Some(bytes);
            }
            TargetSink::Writer(writer) => writer.flush()?,
        }
        state.ended = true;
        debug!(bytes = state.written, "target ended");
        Ok(())
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }

    pub fn bytes_written(&self) -> u64 {
        self.shared.lock().written
    }

    /// Take the finished bytes of an ended memory target.
    pub fn steal_blob(&self) -> Option<Vec<u8>> {
        self.shared.lock().blob.take()
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }
}

/// The codec's view of a [`Target`].
pub struct StreamTarget {
    target: Option<Target>,
    written: u64,
}

impl StreamTarget {
    pub fn new(target: &Target) -> Self {
        Self {
            target: Some(target.clone()),
            written: 0,
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.target
            .as_ref()
            .ok_or(BridgeError::StreamClosed)?
            .write(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Bytes written through this adapter.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and release the strong reference. The host target is not ended.
    pub fn close(&mut self) -> Result<()> {
        if let Some(target) = self.target.take() {
            target.flush()?;
            trace!(bytes = self.written, "stream target closed");
        }
        Ok(())
    }
}

impl Write for StreamTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(to_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &self.target {
            Some(target) => target.flush().map_err(to_io),
            None => Err(to_io(BridgeError::StreamClosed)),
        }
    }
}
