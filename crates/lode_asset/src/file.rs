//! Byte sources, byte sinks and the file-system boundary
//!
//! Loaders only ever see a [`ByteSource`] or a [`ByteSink`], never a path,
//! so the cache runs the same against disk and against memory.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

/// Where the bytes of an asset live
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// File path relative to the asset root; empty when not on disk
    pub file_name: String,
    /// Start of the asset's data inside the file
    pub data_offset: u64,
    /// Length of the data, `None` for "until end of file"
    pub data_length: Option<u64>,
    /// The asset is produced in memory and needs no file
    pub in_memory: bool,
}

impl FileInfo {
    /// No on-disk representation, load is satisfied in memory
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Default::default()
        }
    }

    /// Whole file
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            file_name: name.into(),
            ..Default::default()
        }
    }

    /// Part of a file
    pub fn region(name: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            file_name: name.into(),
            data_offset: offset,
            data_length: Some(length),
            in_memory: false,
        }
    }

    pub fn is_on_disk(&self) -> bool {
        !self.in_memory && !self.file_name.is_empty()
    }
}

/// Random-access readable bytes
pub trait ByteSource: Send {
    /// Total length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `length` bytes at `offset`; a short read is an error
    fn read(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>>;

    /// Read everything
    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let len = usize::try_from(self.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "source too large"))?;
        self.read(0, len)
    }
}

/// Sequential writable bytes
pub trait ByteSink: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flush and publish the written bytes
    fn finish(self: Box<Self>) -> io::Result<()>;
}

fn short_read(offset: u64, length: usize, available: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "short read: {} bytes at offset {} but only {} available",
            length, offset, available
        ),
    )
}

/// Source with no bytes, used for in-memory assets
pub struct EmptySource;

impl ByteSource for EmptySource {
    fn len(&self) -> u64 {
        0
    }

    fn read(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        if length == 0 {
            Ok(Vec::new())
        } else {
            Err(short_read(offset, length, 0))
        }
    }
}

/// Source over shared in-memory bytes
pub struct MemorySource {
    data: Arc<Vec<u8>>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<Vec<u8>>>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let start = usize::try_from(offset).map_err(|_| short_read(offset, length, self.len()))?;
        let end = start
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| short_read(offset, length, self.len()))?;
        Ok(self.data[start..end].to_vec())
    }
}

/// Window into another source
///
/// Offsets passed to `read` are relative to the window start.
pub struct SourceRegion {
    inner: Box<dyn ByteSource>,
    offset: u64,
    length: u64,
}

impl SourceRegion {
    /// `length: None` extends the window to the end of `inner`
    pub fn new(inner: Box<dyn ByteSource>, offset: u64, length: Option<u64>) -> Self {
        let length = length.unwrap_or_else(|| inner.len().saturating_sub(offset));
        Self {
            inner,
            offset,
            length,
        }
    }
}

impl ByteSource for SourceRegion {
    fn len(&self) -> u64 {
        self.length
    }

    fn read(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let end = offset.saturating_add(length as u64);
        if end > self.length {
            return Err(short_read(offset, length, self.length));
        }
        self.inner.read(self.offset + offset, length)
    }
}

struct DiskSource {
    file: fs::File,
    len: u64,
}

impl ByteSource for DiskSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        if offset.saturating_add(length as u64) > self.len {
            return Err(short_read(offset, length, self.len));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

struct DiskSink {
    writer: BufWriter<fs::File>,
}

impl ByteSink for DiskSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

/// Storage the cache opens sources and sinks from
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &str) -> bool;

    fn open_read(&self, path: &str) -> io::Result<Box<dyn ByteSource>>;

    fn open_write(&self, path: &str) -> io::Result<Box<dyn ByteSink>>;
}

/// Files under a root directory
#[derive(Clone, Debug)]
pub struct DiskFileSystem {
    root: PathBuf,
}

impl DiskFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute paths are used as-is, relative ones are joined to the root
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl FileSystem for DiskFileSystem {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn open_read(&self, path: &str) -> io::Result<Box<dyn ByteSource>> {
        let file = fs::File::open(self.resolve(path))?;
        let len = file.metadata()?.len();
        Ok(Box::new(DiskSource { file, len }))
    }

    fn open_write(&self, path: &str) -> io::Result<Box<dyn ByteSink>> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(full)?;
        Ok(Box::new(DiskSink {
            writer: BufWriter::new(file),
        }))
    }
}

/// Files held in memory, for tests and generated content
#[derive(Clone, Default)]
pub struct MemoryFileSystem {
    files: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), Arc::new(data.into()));
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }

    pub fn contents(&self, path: &str) -> Option<Arc<Vec<u8>>> {
        self.files.read().get(path).cloned()
    }
}

struct MemorySink {
    path: String,
    buffer: Vec<u8>,
    files: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl ByteSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        let MemorySink {
            path,
            buffer,
            files,
        } = *self;
        files.write().insert(path, Arc::new(buffer));
        Ok(())
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }

    fn open_read(&self, path: &str) -> io::Result<Box<dyn ByteSource>> {
        let data = self.contents(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path))
        })?;
        Ok(Box::new(MemorySource::new(data)))
    }

    fn open_write(&self, path: &str) -> io::Result<Box<dyn ByteSink>> {
        Ok(Box::new(MemorySink {
            path: path.to_string(),
            buffer: Vec::new(),
            files: self.files.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_short_read() {
        let mut source = MemorySource::new(b"hello".to_vec());
        assert_eq!(source.read(1, 3).unwrap(), b"ell");
        let err = source.read(3, 5).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_region() {
        let inner = Box::new(MemorySource::new(b"0123456789".to_vec()));
        let mut region = SourceRegion::new(inner, 4, Some(3));
        assert_eq!(region.len(), 3);
        assert_eq!(region.read_all().unwrap(), b"456");
        assert!(region.read(2, 2).is_err());

        let inner = Box::new(MemorySource::new(b"0123456789".to_vec()));
        let mut tail = SourceRegion::new(inner, 7, None);
        assert_eq!(tail.read_all().unwrap(), b"789");
    }

    #[test]
    fn test_memory_file_system_sink() {
        let fs = MemoryFileSystem::new();
        assert!(!fs.exists("a.txt"));

        let mut sink = fs.open_write("a.txt").unwrap();
        sink.write(b"abc").unwrap();
        assert!(!fs.exists("a.txt"));
        sink.finish().unwrap();

        assert!(fs.exists("a.txt"));
        assert_eq!(fs.open_read("a.txt").unwrap().read_all().unwrap(), b"abc");
    }

    #[test]
    fn test_disk_file_system() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFileSystem::new(dir.path());

        let mut sink = fs.open_write("nested/data.bin").unwrap();
        sink.write(&[1, 2, 3, 4]).unwrap();
        sink.finish().unwrap();

        assert!(fs.exists("nested/data.bin"));
        let mut source = fs.open_read("nested/data.bin").unwrap();
        assert_eq!(source.len(), 4);
        assert_eq!(source.read(2, 2).unwrap(), vec![3, 4]);
        assert!(source.read(3, 2).is_err());
    }

    #[test]
    fn test_file_info() {
        assert!(!FileInfo::default().is_on_disk());
        assert!(!FileInfo::in_memory().is_on_disk());
        assert!(FileInfo::file("a.bin").is_on_disk());
        assert_eq!(FileInfo::region("a.bin", 4, 8).data_length, Some(8));
    }
}
