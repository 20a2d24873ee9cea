//! Read-only byte sources shared by chunk workers.
//!
//! All access is addressed by absolute offset, so any number of workers can
//! read concurrently without coordinating a shared cursor.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

pub trait ByteSource: Send + Sync + 'static {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `start`. Reading past the end of
    /// the source is an error; a zero-length read always succeeds.
    fn read_range(&self, start: u64, len: usize) -> io::Result<Bytes>;
}

/// A file on disk, shared read-only between workers via positioned reads.
pub struct FileSource {
    file: Arc<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, len: usize) -> io::Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        if start + len as u64 > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}+{len} past end of {}-byte source", self.len),
            ));
        }

        let mut buf = vec![0u8; len];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(&mut buf, start)?;
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            let mut filled = 0usize;
            while filled < len {
                let n = self.file.seek_read(&mut buf[filled..], start + filled as u64)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank during positioned read",
                    ));
                }
                filled += n;
            }
        }

        Ok(Bytes::from(buf))
    }
}

/// In-memory source, used by tests and small payloads.
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, start: u64, len: usize) -> io::Result<Bytes> {
        let end = start + len as u64;
        if end > self.data.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}+{len} past end of {}-byte source", self.data.len()),
            ));
        }
        Ok(self.data.slice(start as usize..end as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_source_positioned_reads() {
        let mut tmp = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let source = FileSource::open(tmp.path()).unwrap();
        assert_eq!(source.len(), 4096);

        let head = source.read_range(0, 16).unwrap();
        assert_eq!(&head[..], &data[..16]);

        let mid = source.read_range(1000, 500).unwrap();
        assert_eq!(&mid[..], &data[1000..1500]);

        let tail = source.read_range(4000, 96).unwrap();
        assert_eq!(&tail[..], &data[4000..]);
    }

    #[test]
    fn test_file_source_rejects_out_of_bounds() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"short").unwrap();
        tmp.flush().unwrap();

        let source = FileSource::open(tmp.path()).unwrap();
        assert!(source.read_range(0, 6).is_err());
        assert!(source.read_range(10, 1).is_err());
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(source.len(), 5);
        assert_eq!(&source.read_range(1, 3).unwrap()[..], &[2, 3, 4]);
        assert!(source.read_range(3, 3).is_err());
    }

    #[test]
    fn test_zero_length_read() {
        let source = MemorySource::new(Vec::<u8>::new());
        assert!(source.is_empty());
        assert_eq!(source.read_range(0, 0).unwrap().len(), 0);
    }
}
