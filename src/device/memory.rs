//! In-memory block device
//!
//! The RAM-backed twin of [`FileDevice`](crate::FileDevice): the same
//! sector interface over a plain byte vector. Shared through an `Arc`, it
//! lets a test drop a journal without shutdown and start a new one on the
//! same bytes, which is exactly the crash a durable device would survive.
//! A fault toggle turns subsequent writes into I/O errors.

use crate::device::{check_access, BlockDevice};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// A block device held entirely in memory.
pub struct MemoryDevice {
    /// Sector storage.
    sectors: RwLock<Vec<u8>>,
    /// Sector size in bytes.
    sector_size: usize,
    /// Number of sectors.
    sector_count: u64,
    /// When set, writes fail with an injected I/O error.
    fail_writes: AtomicBool,
}

impl MemoryDevice {
    /// Create a zero-filled device of `sector_count` sectors.
    pub fn new(sector_size: usize, sector_count: u64) -> Self {
        Self {
            sectors: RwLock::new(vec![0u8; sector_count as usize * sector_size]),
            sector_size,
            sector_count,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail (or succeed again) with an injected
    /// I/O error. Reads are unaffected.
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }
}

impl BlockDevice for MemoryDevice {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sectors(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
        let offset = check_access(self.sector_size, self.sector_count, index, buf.len())?;
        let sectors = self.sectors.read();
        buf.copy_from_slice(&sectors[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_sectors(&self, index: u64, buf: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write fault"));
        }
        let offset = check_access(self.sector_size, self.sector_count, index, buf.len())?;
        let mut sectors = self.sectors.write();
        sectors[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let device = MemoryDevice::new(512, 4);
        device.write_sectors(0, &[9u8; 512]).unwrap();

        let mut back = vec![0u8; 512];
        device.read_sectors(0, &mut back).unwrap();
        assert_eq!(back, [9u8; 512]);
    }

    #[test]
    fn injected_fault_fails_writes_only() {
        let device = MemoryDevice::new(512, 4);
        device.write_sectors(1, &[1u8; 512]).unwrap();

        device.set_failing(true);
        assert!(device.write_sectors(1, &[2u8; 512]).is_err());

        let mut back = vec![0u8; 512];
        device.read_sectors(1, &mut back).unwrap();
        assert_eq!(back, [1u8; 512], "failed write must not change contents");

        device.set_failing(false);
        device.write_sectors(1, &[2u8; 512]).unwrap();
    }
}
