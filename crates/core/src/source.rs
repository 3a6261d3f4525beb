//! Tile data sources
//!
//! The engine never reads pixels itself. A [`TileSource`] is the capability to
//! open a [`SourceReader`] over the bytes backing one or more tiles; whoever
//! decodes pixels uses that reader.
//!
//! [`SourceReader`] is stateless with respect to position: `read_range` takes
//! `&self` and an absolute offset, so one open reader can serve several callers.

use std::fmt;
use std::fs::File;
use std::io::{Error, ErrorKind, Read, Result, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// An open, position-independent reader over a tile source.
pub trait SourceReader: Send + Sync {
    /// Read bytes starting at `start`, returning how many were read.
    fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize>;

    /// Fill `buf` completely from `start`.
    fn read_range_exact(&self, start: u64, buf: &mut [u8]) -> Result<()> {
        let n = buf.len();
        let bytes_read = self.read_range(start, buf)?;
        if bytes_read == n {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("could not fill buffer: {bytes_read} < {n}"),
            ))
        }
    }

    /// Read `start..end` into a new vector.
    fn read_range_to_vec(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let n = end.saturating_sub(start) as usize;
        let mut buf = vec![0; n];
        self.read_range_exact(start, &mut buf)?;
        Ok(buf)
    }

    /// Release the underlying resource. Called exactly once by the handle manager.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl<R: Read + Seek + Send> SourceReader for Mutex<R> {
    fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize> {
        let mut locked = self
            .lock()
            .map_err(|e| Error::new(ErrorKind::Other, format!("{e:?}")))?;
        locked.seek(SeekFrom::Start(start))?;

        // Loop so short reads from the OS still fill the buffer when data exists.
        let mut filled = 0;
        while filled < buf.len() {
            match locked.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

/// The capability to open readers over one backing source.
pub trait TileSource: Send + Sync + fmt::Debug {
    /// Stable identifier; tiles whose sources share an id share one open handle.
    fn source_id(&self) -> &str;

    /// Open a new reader.
    fn open(&self) -> Result<Box<dyn SourceReader>>;
}

/// A tile source backed by a file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    id: String,
    path: PathBuf,
}

impl FileSource {
    /// Create a source whose id is the path itself.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.display().to_string(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TileSource for FileSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn open(&self) -> Result<Box<dyn SourceReader>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(Mutex::new(file)))
    }
}

/// A tile source held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    id: String,
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(id: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl TileSource for MemorySource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn open(&self) -> Result<Box<dyn SourceReader>> {
        Ok(Box::new(MemoryReader {
            data: Arc::clone(&self.data),
        }))
    }
}

struct MemoryReader {
    data: Arc<[u8]>,
}

impl SourceReader for MemoryReader {
    fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if start >= len {
            return Ok(0);
        }
        let start = start as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_source_reads_ranges() {
        let source = MemorySource::new("mem", vec![1u8, 2, 3, 4, 5]);
        let reader = source.open().unwrap();

        assert_eq!(reader.read_range_to_vec(1, 4).unwrap(), vec![2, 3, 4]);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read_range(3, &mut buf).unwrap(), 2);
        assert!(reader.read_range_exact(3, &mut buf).is_err());
        assert_eq!(reader.read_range(10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_file_source_reads_ranges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let source = FileSource::new(file.path());
        assert_eq!(source.source_id(), file.path().display().to_string());

        let reader = source.open().unwrap();
        assert_eq!(reader.read_range_to_vec(2, 5).unwrap(), b"234".to_vec());
        assert!(reader.close().is_ok());
    }

    #[test]
    fn test_file_source_missing_file() {
        let source = FileSource::new("/definitely/not/here.tif");
        let err = source.open().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
