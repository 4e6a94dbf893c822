//! On-disk ring layout and framing
//!
//! This module owns the durable shape of the journal: the header sector
//! that carries the magic identifier, format version, and the two pointers,
//! and the circular payload region behind it. It provides:
//!
//! - Header encoding/decoding with create-vs-attach validation
//! - Monotonic 64-bit positions mapped to storage offsets by `mod L`
//! - Durable pointer advances through single header-sector writes
//! - Byte-granular payload I/O over sector-sized device accesses
//!
//! Positions never wrap: `P` and `C` only ever increase, and the storage
//! offset of a position is computed when bytes are moved. That keeps
//! "before/after" a total order even when the payload region has wrapped
//! many times.
//!
//! Format version 1 records the wrap policy: a frame never straddles the
//! region end. A producer that cannot fit a frame in the space before the
//! end writes a sentinel length there (or nothing, if fewer than four bytes
//! remain) and continues at offset 0; the consumer mirrors both rules. The
//! sentinel is a reserved length value no real frame can carry, so
//! zero-length payloads remain ordinary frames.

pub mod consumer;
pub mod producer;

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;

/// Magic identifier at the start of the header sector.
pub const MAGIC: [u8; 8] = *b"RINGJRNL";

/// Current on-disk format version. Version 1 uses the reserved-length wrap
/// sentinel.
pub const FORMAT_VERSION: u32 = 1;

/// Bytes of frame framing ahead of every payload: a u32 LE length.
pub const FRAME_HEADER_LEN: usize = 4;

/// Length value reserved for the wrap sentinel. The producer rejects any
/// payload long enough to carry it, so a frame length of `WRAP_SENTINEL`
/// always means "skip to the region start".
pub const WRAP_SENTINEL: u32 = u32::MAX;

/// Bytes of the header sector that are actually meaningful.
const HEADER_LEN: usize = 33;

/// Whether the ring is accepting new frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    /// The producer may append.
    Running,
    /// The suspend flag is set; pushes are refused until resume.
    Suspended,
}

/// Decoded contents of the header sector.
#[derive(Debug, Clone, Copy)]
struct RingHeader {
    /// Producer position: exclusive upper bound of published frames.
    producer_pos: u64,
    /// Consumer position: lower bound of not-yet-consumed frames.
    consumer_pos: u64,
    /// Suspend flag.
    suspended: bool,
}

impl RingHeader {
    fn encode(&self, sector: &mut [u8]) {
        sector.fill(0);
        sector[0..8].copy_from_slice(&MAGIC);
        sector[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        // bytes 12..16 reserved, left zero
        sector[16..24].copy_from_slice(&self.producer_pos.to_le_bytes());
        sector[24..32].copy_from_slice(&self.consumer_pos.to_le_bytes());
        sector[32] = self.suspended as u8;
    }

    fn decode(sector: &[u8]) -> Result<Self> {
        if sector.iter().all(|b| *b == 0) {
            return Err(Error::Unformatted);
        }
        if sector[0..8] != MAGIC {
            let mut found = [0u8; 8];
            found.copy_from_slice(&sector[0..8]);
            return Err(Error::BadMagic { found });
        }
        let version = u32::from_le_bytes(sector[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::BadVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(Self {
            producer_pos: u64::from_le_bytes(sector[16..24].try_into().unwrap()),
            consumer_pos: u64::from_le_bytes(sector[24..32].try_into().unwrap()),
            suspended: sector[32] != 0,
        })
    }
}

/// A durable ring on a block device.
///
/// The header sector is mirrored in memory behind a mutex; every durable
/// pointer update goes through that mirror, so producer-side and
/// consumer-side writes to the shared header sector never interleave.
pub struct Ring {
    /// Underlying storage.
    device: Arc<dyn BlockDevice>,
    /// Sector size, cached from the device.
    sector_size: usize,
    /// Payload region length `L` in bytes.
    capacity: u64,
    /// In-memory mirror of the header sector.
    header: Mutex<RingHeader>,
}

impl Ring {
    /// Initialize a fresh ring on `device`: both pointers zero, resumed.
    ///
    /// Overwrites whatever header the device held before.
    pub fn create(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let (sector_size, capacity) = Self::geometry(device.as_ref())?;
        let header = RingHeader {
            producer_pos: 0,
            consumer_pos: 0,
            suspended: false,
        };
        let ring = Self {
            device,
            sector_size,
            capacity,
            header: Mutex::new(header),
        };
        ring.store_header(&header)?;
        info!("created ring: {capacity} payload bytes in {sector_size}-byte sectors");
        Ok(ring)
    }

    /// Attach to an existing ring on `device`, validating magic, version,
    /// and pointer sanity.
    ///
    /// A device whose header sector is all zeros reports
    /// [`Error::Unformatted`], which callers may answer with [`create`].
    ///
    /// [`create`]: Ring::create
    pub fn attach(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let (sector_size, capacity) = Self::geometry(device.as_ref())?;

        let mut sector = vec![0u8; sector_size];
        device.read_sectors(0, &mut sector)?;
        let header = RingHeader::decode(&sector)?;

        if header.consumer_pos > header.producer_pos
            || header.producer_pos - header.consumer_pos > capacity
        {
            return Err(Error::InvalidGeometry {
                reason: format!(
                    "header pointers P={} C={} violate C <= P <= C + {capacity}",
                    header.producer_pos, header.consumer_pos
                ),
            });
        }

        info!(
            "attached ring: {} bytes pending of {capacity}",
            header.producer_pos - header.consumer_pos
        );
        Ok(Self {
            device,
            sector_size,
            capacity,
            header: Mutex::new(header),
        })
    }

    fn geometry(device: &dyn BlockDevice) -> Result<(usize, u64)> {
        let sector_size = device.sector_size();
        let sector_count = device.sector_count();
        // One sector for the header (which must fit in it), at least one
        // more for the payload region.
        if sector_size < HEADER_LEN || sector_count < 2 {
            return Err(Error::DeviceTooSmall {
                sector_size,
                sector_count,
            });
        }
        Ok((sector_size, (sector_count - 1) * sector_size as u64))
    }

    /// Payload region length `L` in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whether the ring is running or suspended.
    pub fn state(&self) -> RingState {
        if self.header.lock().suspended {
            RingState::Suspended
        } else {
            RingState::Running
        }
    }

    /// Current `(P, C)` pointer pair, read as one consistent snapshot.
    pub fn positions(&self) -> (u64, u64) {
        let header = self.header.lock();
        (header.producer_pos, header.consumer_pos)
    }

    /// Durably advance the producer pointer to `pos`, publishing every
    /// frame written below it.
    pub fn advance_producer(&self, pos: u64) -> Result<()> {
        let mut header = self.header.lock();
        assert!(pos >= header.producer_pos, "producer pointer must not move backwards");
        assert!(
            pos - header.consumer_pos <= self.capacity,
            "producer advance would overfill the ring"
        );
        let mut updated = *header;
        updated.producer_pos = pos;
        self.store_header(&updated)?;
        *header = updated;
        Ok(())
    }

    /// Durably advance the consumer pointer to `pos`, consuming every frame
    /// below it.
    pub fn advance_consumer(&self, pos: u64) -> Result<()> {
        let mut header = self.header.lock();
        assert!(pos >= header.consumer_pos, "consumer pointer must not move backwards");
        assert!(pos <= header.producer_pos, "consumer pointer must not pass the producer");
        let mut updated = *header;
        updated.consumer_pos = pos;
        self.store_header(&updated)?;
        *header = updated;
        Ok(())
    }

    /// Durably set or clear the suspend flag.
    pub(crate) fn set_suspended(&self, suspended: bool) -> Result<()> {
        let mut header = self.header.lock();
        if header.suspended == suspended {
            return Ok(());
        }
        let mut updated = *header;
        updated.suspended = suspended;
        self.store_header(&updated)?;
        *header = updated;
        Ok(())
    }

    fn store_header(&self, header: &RingHeader) -> Result<()> {
        let mut sector = vec![0u8; self.sector_size];
        header.encode(&mut sector);
        self.device.write_sectors(0, &sector)?;
        Ok(())
    }

    /// Storage offset of a position within the payload region.
    pub(crate) fn offset_of(&self, pos: u64) -> u64 {
        pos % self.capacity
    }

    /// Contiguous bytes between a position and the region end.
    pub(crate) fn room_after(&self, pos: u64) -> u64 {
        self.capacity - self.offset_of(pos)
    }

    /// Durably write `bytes` at `pos`. The range must not cross the region
    /// end; wrap handling is the caller's job.
    pub(crate) fn write_payload(&self, pos: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        assert!(
            bytes.len() as u64 <= self.room_after(pos),
            "payload write crosses the region end"
        );
        let (first, span, lead) = self.span_of(pos, bytes.len());
        let mut buf = vec![0u8; span * self.sector_size];

        // Partially covered edge sectors keep their surrounding bytes.
        let tail_end = lead + bytes.len();
        if lead != 0 {
            self.device
                .read_sectors(first, &mut buf[..self.sector_size])?;
        }
        if tail_end % self.sector_size != 0 {
            let last = span - 1;
            if last > 0 || lead == 0 {
                self.device.read_sectors(
                    first + last as u64,
                    &mut buf[last * self.sector_size..],
                )?;
            }
        }

        buf[lead..tail_end].copy_from_slice(bytes);
        self.device.write_sectors(first, &buf)?;
        Ok(())
    }

    /// Read `len` bytes at `pos`. Same no-wrap requirement as
    /// [`write_payload`](Ring::write_payload).
    pub(crate) fn read_payload(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        assert!(
            len as u64 <= self.room_after(pos),
            "payload read crosses the region end"
        );
        let (first, span, lead) = self.span_of(pos, len);
        let mut buf = vec![0u8; span * self.sector_size];
        self.device.read_sectors(first, &mut buf)?;
        Ok(buf[lead..lead + len].to_vec())
    }

    /// Sector span covering `len` bytes at `pos`: first sector index, number
    /// of sectors, and the lead offset of the first byte within the span.
    fn span_of(&self, pos: u64, len: usize) -> (u64, usize, usize) {
        // Payload region begins at sector 1.
        let absolute = self.sector_size as u64 + self.offset_of(pos);
        let first = absolute / self.sector_size as u64;
        let lead = (absolute % self.sector_size as u64) as usize;
        let span = (lead + len + self.sector_size - 1) / self.sector_size;
        (first, span, lead)
    }
}
