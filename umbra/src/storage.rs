//! Byte-addressable backing stores for image planes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::{Mutex, RwLock};

/// Random-access bytes behind one image. Implementations synchronize only
/// the individual call; region locks decide who may touch which bytes.
pub trait PixelStorage: Send + Sync + std::fmt::Debug {
    /// Fills `buf` with the bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `buf` starting at `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_writable(&self) -> bool;
}

fn out_of_range(offset: u64, len: usize, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "{} bytes at offset {} are outside storage of {} bytes",
            len, offset, size
        ),
    )
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    bytes: RwLock<Vec<u8>>,
}

impl MemoryStorage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    fn range(&self, offset: u64, len: usize, size: usize) -> io::Result<std::ops::Range<usize>> {
        let start =
            usize::try_from(offset).map_err(|_| out_of_range(offset, len, size as u64))?;
        match start.checked_add(len) {
            Some(end) if end <= size => Ok(start..end),
            _ => Err(out_of_range(offset, len, size as u64)),
        }
    }
}

impl PixelStorage for MemoryStorage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let bytes = self.bytes.read();
        let range = self.range(offset, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[range]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut bytes = self.bytes.write();
        let range = self.range(offset, buf.len(), bytes.len())?;
        bytes[range].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.bytes.read().len() as u64
    }

    fn is_writable(&self) -> bool {
        true
    }
}

/// A file on disk. Seeks and transfers happen under one mutex per file.
#[derive(Debug)]
pub struct FileStorage {
    file: Mutex<File>,
    len: u64,
    writable: bool,
}

impl FileStorage {
    pub fn open(path: &Path, writable: bool) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();
        tracing::debug!(
            "Opened {} ({} bytes, {})",
            path.display(),
            len,
            if writable { "read/write" } else { "read-only" }
        );
        Ok(Self {
            file: Mutex::new(file),
            len,
            writable,
        })
    }

    fn check_range(&self, offset: u64, len: usize) -> io::Result<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(out_of_range(offset, len, self.len)),
        }
    }
}

impl PixelStorage for FileStorage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.check_range(offset, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "storage was opened read-only",
            ));
        }
        self.check_range(offset, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::scratch_dir;

    #[test]
    fn test_memory_read_write() {
        let storage = MemoryStorage::zeroed(8);
        storage.write_at(2, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 4];
        storage.read_at(1, &mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(storage.len(), 8);
    }

    #[test]
    fn test_memory_out_of_range_is_error() {
        let storage = MemoryStorage::zeroed(4);
        let mut buf = [0u8; 4];
        let err = storage.read_at(1, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(storage.write_at(u64::MAX, &[1]).is_err());
    }

    #[test]
    fn test_file_storage_round_trip() {
        let path = scratch_dir("test_file_storage_round_trip").join("plane.bin");
        std::fs::write(&path, vec![0u8; 16]).unwrap();

        let storage = FileStorage::open(&path, true).unwrap();
        storage.write_at(4, &[9, 8, 7]).unwrap();
        let mut buf = [0u8; 5];
        storage.read_at(3, &mut buf).unwrap();
        assert_eq!(buf, [0, 9, 8, 7, 0]);
        drop(storage);

        assert_eq!(&std::fs::read(&path).unwrap()[4..7], &[9, 8, 7]);
    }

    #[test]
    fn test_read_only_file_rejects_writes() {
        let path = scratch_dir("test_read_only_file_rejects_writes").join("plane.bin");
        std::fs::write(&path, vec![0u8; 4]).unwrap();

        let storage = FileStorage::open(&path, false).unwrap();
        assert!(!storage.is_writable());
        let err = storage.write_at(0, &[1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
