//! Pluggable Storage Backend
//!
//! A trace writes to a numbered sequence of parts: part 0 is the primary
//! file, parts 1.. are break files that start with a copy of part 0's
//! directory. The backend decides where those bytes live.
//!
//! # Example
//!
//! ```rust
//! use lxt2_core::storage::{MemoryStorage, StorageBackend};
//!
//! let storage = MemoryStorage::new();
//! let handle = storage.clone();
//! let _stream = storage.create(0).unwrap();
//! assert_eq!(handle.part_count(), 1);
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// Random-access byte sink a trace part is written through
pub trait TraceStream: Write + Seek + Send {}

impl<T: Write + Seek + Send> TraceStream for T {}

/// Storage backend trait for trace parts
///
/// All methods take `&self`; backends that keep state use interior
/// mutability.
pub trait StorageBackend: Send {
    /// Create (truncating) part `part` and return a stream positioned at 0
    fn create(&self, part: u32) -> Result<Box<dyn TraceStream>>;

    /// Read back the first `len` bytes of part 0
    fn read_header(&self, len: u64) -> Result<Vec<u8>>;

    /// Human-readable name of a part (for logging)
    fn part_name(&self, part: u32) -> String;

    /// Get backend name (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Name of break file `part` derived from the primary file name.
///
/// The name is cut at its last `.` unless that dot is the first character,
/// then `_NNN.lxt` is appended.
pub fn break_file_name(primary: &str, part: u32) -> String {
    let stem = match primary.rfind('.') {
        Some(dot) if dot > 0 => &primary[..dot],
        _ => primary,
    };
    format!("{}_{:03}.lxt", stem, part)
}

/// File-based storage backend
///
/// Part 0 is the path given to [`FileStorage::new`]; break files land in
/// the same directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of part `part`
    pub fn part_path(&self, part: u32) -> PathBuf {
        if part == 0 {
            return self.path.clone();
        }
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(break_file_name(&file_name, part))
    }
}

impl StorageBackend for FileStorage {
    fn create(&self, part: u32) -> Result<Box<dyn TraceStream>> {
        let file = File::create(self.part_path(part))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn read_header(&self, len: u64) -> Result<Vec<u8>> {
        let mut header = Vec::with_capacity(len as usize);
        File::open(&self.path)?.take(len).read_to_end(&mut header)?;
        if (header.len() as u64) < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("primary file holds {} of {} header bytes", header.len(), len),
            )
            .into());
        }
        Ok(header)
    }

    fn part_name(&self, part: u32) -> String {
        self.part_path(part).display().to_string()
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

type SharedParts = Arc<Mutex<Vec<Vec<u8>>>>;

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "memory storage lock poisoned")
}

/// In-memory storage backend
///
/// Clones share the same parts, so a test can keep a handle and inspect
/// the bytes after the trace is closed.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    parts: SharedParts,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of part `part`
    pub fn part(&self, part: u32) -> Option<Vec<u8>> {
        self.parts.lock().ok()?.get(part as usize).cloned()
    }

    /// Copy of the primary part (empty if never created)
    pub fn primary(&self) -> Vec<u8> {
        self.part(0).unwrap_or_default()
    }

    pub fn part_count(&self) -> usize {
        self.parts.lock().map(|parts| parts.len()).unwrap_or(0)
    }
}

impl StorageBackend for MemoryStorage {
    fn create(&self, part: u32) -> Result<Box<dyn TraceStream>> {
        let mut parts = self.parts.lock().map_err(|_| poisoned())?;
        let index = part as usize;
        if parts.len() <= index {
            parts.resize_with(index + 1, Vec::new);
        }
        parts[index].clear();
        Ok(Box::new(MemoryStream {
            parts: Arc::clone(&self.parts),
            index,
            cursor: 0,
        }))
    }

    fn read_header(&self, len: u64) -> Result<Vec<u8>> {
        let parts = self.parts.lock().map_err(|_| poisoned())?;
        let primary = parts.first().map(Vec::as_slice).unwrap_or_default();
        match primary.get(..len as usize) {
            Some(header) => Ok(header.to_vec()),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("primary part holds {} of {} header bytes", primary.len(), len),
            )
            .into()),
        }
    }

    fn part_name(&self, part: u32) -> String {
        format!("memory part {}", part)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Cursor over one shared in-memory part
struct MemoryStream {
    parts: SharedParts,
    index: usize,
    cursor: u64,
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut parts = self.parts.lock().map_err(|_| poisoned())?;
        let data = &mut parts[self.index];
        let start = self.cursor as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.cursor = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = {
            let parts = self.parts.lock().map_err(|_| poisoned())?;
            parts[self.index].len() as i64
        };
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => self.cursor as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of part",
            ));
        }
        self.cursor = target as u64;
        Ok(self.cursor)
    }
}
