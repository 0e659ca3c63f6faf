use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::ForgeError;

/// Sector size used when a device does not report its own.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Random-access byte I/O over a fixed-sector device.
///
/// All operations address the device by absolute byte offset; no seek
/// state is observable between calls. Implementations are expected to
/// either transfer the full buffer or fail.
pub trait BlockDevice {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ForgeError>;

    /// Write `buf` starting at `offset`.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, ForgeError>;

    /// Total capacity of the device in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed sector size in bytes, typically 512.
    fn sector_size(&self) -> u32;
}

/// A block device backed by a regular file, e.g. a raw disk image.
pub struct FileDisk {
    file: File,
    len: u64,
    sector_size: u32,
}

impl FileDisk {
    /// Wrap an open file. Fails if the handle refers to a directory.
    pub fn new(file: File) -> Result<Self, ForgeError> {
        Self::with_sector_size(file, DEFAULT_SECTOR_SIZE)
    }

    pub fn with_sector_size(file: File, sector_size: u32) -> Result<Self, ForgeError> {
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(ForgeError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot use a directory as a block device",
            )));
        }

        Ok(Self {
            file,
            len: metadata.len(),
            sector_size,
        })
    }
}

impl BlockDevice for FileDisk {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ForgeError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(buf.len())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, ForgeError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }
}

/// An in-memory block device with a fixed capacity.
///
/// The workhorse for tests and for building images without touching
/// real hardware.
pub struct MemDisk {
    data: Vec<u8>,
    sector_size: u32,
}

impl MemDisk {
    /// Create a zero-filled device of `len` bytes.
    pub fn new(len: u64) -> Self {
        Self::with_sector_size(len, DEFAULT_SECTOR_SIZE)
    }

    pub fn with_sector_size(len: u64, sector_size: u32) -> Self {
        Self {
            data: vec![0u8; len as usize],
            sector_size,
        }
    }

    /// Wrap an existing image.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn check_range(&self, buf_len: usize, offset: u64) -> Result<(), ForgeError> {
        let end = offset
            .checked_add(buf_len as u64)
            .ok_or_else(|| ForgeError::Io(io::ErrorKind::UnexpectedEof.into()))?;
        if end > self.data.len() as u64 {
            return Err(ForgeError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "access at {}..{} beyond device capacity {}",
                    offset,
                    end,
                    self.data.len()
                ),
            )));
        }
        Ok(())
    }
}

impl BlockDevice for MemDisk {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ForgeError> {
        self.check_range(buf.len(), offset)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(buf.len())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, ForgeError> {
        self.check_range(buf.len(), offset)?;
        let start = offset as usize;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn mem_disk_round_trip() {
        let mut disk = MemDisk::new(4096);
        disk.write_at(b"hello", 1000).unwrap();

        let mut buf = [0u8; 5];
        disk.read_at(&mut buf, 1000).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn mem_disk_rejects_out_of_range() {
        let mut disk = MemDisk::new(512);
        let mut buf = [0u8; 16];
        assert!(disk.read_at(&mut buf, 510).is_err());
        assert!(disk.write_at(&buf, 500).is_err());
    }

    #[test]
    fn file_disk_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let handle = File::open(dir.path()).unwrap();
        assert!(FileDisk::new(handle).is_err());
    }

    #[test]
    fn file_disk_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 2048]).unwrap();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        let mut disk = FileDisk::new(file).unwrap();
        assert_eq!(disk.len(), 2048);
        assert_eq!(disk.sector_size(), 512);

        disk.write_at(b"abc", 512).unwrap();
        let mut buf = [0u8; 3];
        disk.read_at(&mut buf, 512).unwrap();
        assert_eq!(&buf, b"abc");
    }
}
