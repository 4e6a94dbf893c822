//! Consumer side of the ring
//!
//! Reading never mutates the ring: `pop` and `fold` walk the published
//! range `[C, P)` from the current consumer pointer and return the same
//! frames on every call until `advance` durably moves `C`. That idempotence
//! is what the engine's at-least-once replay is built on: a crash between
//! handling a batch and advancing simply makes the next start read the
//! batch again.
//!
//! The walk mirrors the producer's wrap policy exactly: the reserved
//! sentinel length is a jump to the region start, and a tail too short to
//! hold a length is skipped without one. A zero length is an ordinary
//! frame with an empty payload.

use crate::error::{Error, Result};
use crate::ring::{Ring, FRAME_HEADER_LEN, WRAP_SENTINEL};
use log::debug;
use std::sync::Arc;

/// Reads framed items from a ring and durably consumes them.
pub struct Consumer {
    /// Shared ring handle.
    ring: Arc<Ring>,
}

impl Consumer {
    /// Attach a consumer to a ring.
    pub fn attach(ring: Arc<Ring>) -> Self {
        Self { ring }
    }

    /// Read the next published frame without consuming it.
    ///
    /// Returns the exclusive end position (the `advance` target that
    /// consumes the frame) and the payload bytes, or `None` when the ring
    /// is drained. Repeated calls return the same frame until `advance`.
    pub fn pop(&self) -> Result<Option<(u64, Vec<u8>)>> {
        let (produced, consumed) = self.ring.positions();
        Ok(self
            .next_frame(consumed, produced)?
            .map(|(_, end, bytes)| (end, bytes)))
    }

    /// Fold every published frame in `[C, P)` in order.
    ///
    /// The closure receives the accumulator, the frame's start position,
    /// and its payload. Returns the exclusive end position (passing it to
    /// [`advance`](Consumer::advance) consumes the whole batch atomically)
    /// and the final accumulator. Does not consume anything itself.
    pub fn fold<B, F>(&self, init: B, mut f: F) -> Result<(u64, B)>
    where
        F: FnMut(B, u64, Vec<u8>) -> B,
    {
        let (produced, consumed) = self.ring.positions();
        let mut acc = init;
        let mut pos = consumed;
        let mut frames = 0usize;

        while let Some((start, end, bytes)) = self.next_frame(pos, produced)? {
            acc = f(acc, start, bytes);
            pos = end;
            frames += 1;
        }

        if frames > 0 {
            debug!("fold read {frames} frames in [{consumed}, {pos})");
        }
        Ok((pos, acc))
    }

    /// Durably advance the consumer pointer to `pos`, consuming every frame
    /// below it.
    pub fn advance(&self, pos: u64) -> Result<()> {
        self.ring.advance_consumer(pos)
    }

    /// Durably set the suspend flag. Takes effect on the producer's next
    /// push attempt; nothing waits for an acknowledgement.
    pub fn suspend(&self) -> Result<()> {
        self.ring.set_suspended(true)
    }

    /// Durably clear the suspend flag.
    pub fn resume(&self) -> Result<()> {
        self.ring.set_suspended(false)
    }

    /// Locate the frame at `pos`, skipping wrap gaps. Returns the frame's
    /// start position, exclusive end position, and payload.
    fn next_frame(&self, mut pos: u64, produced: u64) -> Result<Option<(u64, u64, Vec<u8>)>> {
        loop {
            if pos == produced {
                return Ok(None);
            }

            let room = self.ring.room_after(pos);
            if room < FRAME_HEADER_LEN as u64 {
                // Implicit skip: the tail cannot hold a length.
                pos += room;
                if pos > produced {
                    return Err(Error::Parse {
                        position: pos - room,
                        detail: "producer pointer inside an implicit wrap gap".into(),
                    });
                }
                continue;
            }

            let len_bytes = self.ring.read_payload(pos, FRAME_HEADER_LEN)?;
            let raw_len = u32::from_le_bytes(len_bytes.try_into().unwrap());
            if raw_len == WRAP_SENTINEL {
                // Sentinel: jump to the region start.
                pos += room;
                if pos > produced {
                    return Err(Error::Parse {
                        position: pos - room,
                        detail: "producer pointer inside a sentinel wrap gap".into(),
                    });
                }
                continue;
            }

            let len = raw_len as u64;
            let frame_len = FRAME_HEADER_LEN as u64 + len;
            if frame_len > room {
                return Err(Error::Parse {
                    position: pos,
                    detail: format!("{len}-byte frame would straddle the region end"),
                });
            }
            let end = pos + frame_len;
            if end > produced {
                return Err(Error::Parse {
                    position: pos,
                    detail: format!("{len}-byte frame truncated at producer pointer {produced}"),
                });
            }

            let bytes = self.ring.read_payload(pos + FRAME_HEADER_LEN as u64, len as usize)?;
            return Ok(Some((pos, end, bytes)));
        }
    }
}
