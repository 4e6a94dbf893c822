//! File-backed block device using memory-mapped I/O
//!
//! Sector reads copy out of a writable memory map; sector writes copy into
//! it and flush the touched byte range before reporting success, which is
//! what gives `write_sectors` its durability guarantee. Opening an existing
//! file keeps its length and ignores the requested sector count, so a
//! journal reopened after a crash sees exactly the bytes it last flushed.

use crate::device::{check_access, BlockDevice};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// A block device stored in a regular file.
pub struct FileDevice {
    /// Path to the backing file.
    path: PathBuf,
    /// Writable map of the whole file.
    mmap: RwLock<MmapMut>,
    /// Sector size in bytes.
    sector_size: usize,
    /// Number of sectors in the file.
    sector_count: u64,
}

impl FileDevice {
    /// Open or create a file device at `path`.
    ///
    /// A new file is sized to `sector_count * sector_size` bytes. An
    /// existing file keeps its length, which must be a non-zero whole
    /// number of `sector_size`-byte sectors.
    pub fn open<P: AsRef<Path>>(path: P, sector_size: usize, sector_count: u64) -> io::Result<Self> {
        if sector_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sector size must be non-zero",
            ));
        }
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let is_new = file_size == 0;

        let len = if is_new {
            let len = sector_count
                .checked_mul(sector_size as u64)
                .filter(|len| *len > 0)
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "empty or overlong device")
                })?;
            file.set_len(len)?;
            len
        } else {
            if file_size % sector_size as u64 != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "file of {file_size} bytes is not a whole number of {sector_size}-byte sectors"
                    ),
                ));
            }
            file_size
        };

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(Self {
            path,
            mmap: RwLock::new(mmap),
            sector_size,
            sector_count: len / sector_size as u64,
        })
    }

    /// Path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockDevice for FileDevice {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sectors(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
        let offset = check_access(self.sector_size, self.sector_count, index, buf.len())?;
        let mmap = self.mmap.read();
        buf.copy_from_slice(&mmap[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_sectors(&self, index: u64, buf: &[u8]) -> io::Result<()> {
        let offset = check_access(self.sector_size, self.sector_count, index, buf.len())?;
        let mut mmap = self.mmap.write();
        mmap[offset..offset + buf.len()].copy_from_slice(buf);
        mmap.flush_range(offset, buf.len())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_sizes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev.dat");

        let device = FileDevice::open(&path, 512, 8).unwrap();
        assert_eq!(device.sector_size(), 512);
        assert_eq!(device.sector_count(), 8);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn write_read_round_trip() {
        let dir = tempdir().unwrap();
        let device = FileDevice::open(dir.path().join("dev.dat"), 512, 4).unwrap();

        let payload = vec![0xabu8; 1024];
        device.write_sectors(1, &payload).unwrap();

        let mut back = vec![0u8; 1024];
        device.read_sectors(1, &mut back).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn reopen_keeps_contents_and_ignores_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev.dat");

        {
            let device = FileDevice::open(&path, 512, 8).unwrap();
            device.write_sectors(2, &[7u8; 512]).unwrap();
        }

        let device = FileDevice::open(&path, 512, 0).unwrap();
        assert_eq!(device.sector_count(), 8, "existing length wins");

        let mut back = vec![0u8; 512];
        device.read_sectors(2, &mut back).unwrap();
        assert_eq!(back, [7u8; 512]);
    }

    #[test]
    fn rejects_misaligned_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev.dat");
        std::fs::write(&path, vec![0u8; 700]).unwrap();

        assert!(FileDevice::open(&path, 512, 8).is_err());
    }
}
