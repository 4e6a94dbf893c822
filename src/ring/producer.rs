//! Producer side of the ring
//!
//! Appending is two-phase, the durable analogue of a reserve-write-commit
//! cycle: `try_push` durably writes the frame bytes (and any wrap sentinel)
//! into the payload region but leaves the producer pointer untouched;
//! `advance` then publishes the frame with a single durable header write.
//! A crash between the two phases leaves unreferenced bytes beyond `P` that
//! no consumer will ever look at, so torn frames are unobservable.

use crate::error::{Error, Result};
use crate::ring::{Ring, RingState, FRAME_HEADER_LEN, WRAP_SENTINEL};
use log::warn;
use std::sync::Arc;

/// Outcome of a push attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Frame bytes are durably written; the value is the exclusive end
    /// position to pass to [`Producer::advance`] for publication.
    Accepted(u64),
    /// Not enough free space right now; retry once the consumer advances.
    Full,
    /// The ring is suspended; retry after resume.
    Suspended,
}

/// Appends framed items to a ring.
pub struct Producer {
    /// Shared ring handle.
    ring: Arc<Ring>,
}

impl Producer {
    /// Attach a producer to a ring.
    pub fn attach(ring: Arc<Ring>) -> Self {
        Self { ring }
    }

    /// Durably write one frame for `payload` without publishing it.
    ///
    /// Returns [`Error::TooBig`] when the frame could never fit even in an
    /// empty ring, [`PushStatus::Suspended`] while the suspend flag is set,
    /// and [`PushStatus::Full`] when the frame (plus any wrap skip) exceeds
    /// the free space left by the consumer.
    pub fn try_push(&self, payload: &[u8]) -> Result<PushStatus> {
        let capacity = self.ring.capacity();
        let frame_len = FRAME_HEADER_LEN as u64 + payload.len() as u64;
        // The length field must stay below the wrap sentinel.
        if payload.len() >= WRAP_SENTINEL as usize || frame_len > capacity {
            warn!("rejecting {}-byte item: exceeds ring capacity {capacity}", payload.len());
            return Err(Error::TooBig {
                size: payload.len().saturating_add(FRAME_HEADER_LEN),
                capacity,
            });
        }

        if self.ring.state() == RingState::Suspended {
            return Ok(PushStatus::Suspended);
        }

        let (produced, consumed) = self.ring.positions();
        let room = self.ring.room_after(produced);
        // Frames never straddle the region end: skip the tail when short.
        let skip = if frame_len > room { room } else { 0 };

        if skip + frame_len > capacity - (produced - consumed) {
            return Ok(PushStatus::Full);
        }

        if skip > 0 && room >= FRAME_HEADER_LEN as u64 {
            // The reserved sentinel length tells the consumer to jump to
            // the region start. A tail shorter than the sentinel itself is
            // skipped implicitly by both sides.
            self.ring.write_payload(produced, &WRAP_SENTINEL.to_le_bytes())?;
        }

        let start = produced + skip;
        let mut frame = Vec::with_capacity(frame_len as usize);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        self.ring.write_payload(start, &frame)?;

        Ok(PushStatus::Accepted(start + frame_len))
    }

    /// Durably advance the producer pointer to `pos`, publishing every
    /// frame accepted below it.
    pub fn advance(&self, pos: u64) -> Result<()> {
        self.ring.advance_producer(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;

    fn small_ring() -> Arc<Ring> {
        // 512 bytes of payload behind the header sector.
        Arc::new(Ring::create(Arc::new(MemoryDevice::new(512, 2))).unwrap())
    }

    #[test]
    fn accepted_positions_are_cumulative() {
        let ring = small_ring();
        let producer = Producer::attach(ring.clone());

        assert_eq!(producer.try_push(&[1u8; 60]).unwrap(), PushStatus::Accepted(64));
        producer.advance(64).unwrap();
        assert_eq!(producer.try_push(&[2u8; 60]).unwrap(), PushStatus::Accepted(128));
        producer.advance(128).unwrap();
        assert_eq!(ring.positions(), (128, 0));
    }

    #[test]
    fn empty_payloads_are_ordinary_frames() {
        let ring = small_ring();
        let producer = Producer::attach(ring.clone());

        assert_eq!(producer.try_push(b"").unwrap(), PushStatus::Accepted(4));
        producer.advance(4).unwrap();
        assert_eq!(ring.positions(), (4, 0));
    }

    #[test]
    fn unpublished_frames_do_not_move_the_pointer() {
        let ring = small_ring();
        let producer = Producer::attach(ring.clone());

        producer.try_push(b"speculative").unwrap();
        assert_eq!(ring.positions(), (0, 0));
    }

    #[test]
    fn too_big_is_permanent_and_harmless() {
        let ring = small_ring();
        let producer = Producer::attach(ring.clone());

        let before = ring.positions();
        assert!(matches!(
            producer.try_push(&[0u8; 1024]),
            Err(Error::TooBig { capacity: 512, .. })
        ));
        assert_eq!(ring.positions(), before);

        // An item exactly filling the region is still pushable.
        assert_eq!(
            producer.try_push(&[0u8; 512 - FRAME_HEADER_LEN]).unwrap(),
            PushStatus::Accepted(512)
        );
    }

    #[test]
    fn full_until_consumer_advances() {
        let ring = small_ring();
        let producer = Producer::attach(ring.clone());

        assert_eq!(producer.try_push(&[0u8; 252]).unwrap(), PushStatus::Accepted(256));
        producer.advance(256).unwrap();
        assert_eq!(producer.try_push(&[0u8; 252]).unwrap(), PushStatus::Accepted(512));
        producer.advance(512).unwrap();

        assert_eq!(producer.try_push(&[0u8; 252]).unwrap(), PushStatus::Full);

        ring.advance_consumer(256).unwrap();
        assert_eq!(producer.try_push(&[0u8; 252]).unwrap(), PushStatus::Accepted(768));
    }

    #[test]
    fn suspended_ring_refuses_pushes() {
        let ring = small_ring();
        let producer = Producer::attach(ring.clone());

        ring.set_suspended(true).unwrap();
        assert_eq!(producer.try_push(b"nope").unwrap(), PushStatus::Suspended);

        ring.set_suspended(false).unwrap();
        assert!(matches!(producer.try_push(b"yes").unwrap(), PushStatus::Accepted(_)));
    }
}
