//! Error types for the journal crate
//!
//! One crate-wide error enum covers the three layers: block-device I/O,
//! ring attach/framing failures, and engine lifecycle conditions. Ring-level
//! backpressure outcomes (`Full`, `Suspended`) are deliberately not errors;
//! they are ordinary [`PushStatus`](crate::PushStatus) values handled by
//! waiting.

use std::io;
use thiserror::Error;

/// Boxed error type returned by a [`Handler`](crate::Handler) rejecting a
/// batch.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the ring and the journal engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Block-device failure. Surfaced from `push`; fatal inside replay.
    #[error("device i/o error: {0}")]
    Io(#[from] io::Error),

    /// The header sector is all zeros: the device has never held a ring.
    #[error("device does not contain a journal ring")]
    Unformatted,

    /// The header sector carries data that is not a journal ring.
    #[error("unrecognized ring magic {found:?}")]
    BadMagic {
        /// The bytes found where the magic identifier was expected.
        found: [u8; 8],
    },

    /// The ring was written by an incompatible format version.
    #[error("unsupported ring format version {found} (expected {expected})")]
    BadVersion {
        /// Version number read from the header.
        found: u32,
        /// Version number this build understands.
        expected: u32,
    },

    /// The device cannot hold a header sector plus a non-empty payload
    /// region.
    #[error("device of {sector_count} {sector_size}-byte sectors is too small for a ring")]
    DeviceTooSmall {
        /// Sector size reported by the device.
        sector_size: usize,
        /// Sector count reported by the device.
        sector_count: u64,
    },

    /// The header pointers violate `C <= P <= C + L`.
    #[error("corrupt ring pointers: {reason}")]
    InvalidGeometry {
        /// Human-readable description of the violated invariant.
        reason: String,
    },

    /// A frame in `[C, P)` is malformed. Fatal: skipping it would break the
    /// at-least-once guarantee.
    #[error("malformed frame at position {position}: {detail}")]
    Parse {
        /// Logical position at which the frame begins.
        position: u64,
        /// What was wrong with the frame.
        detail: String,
    },

    /// The encoded item can never fit in the ring, regardless of drain
    /// progress. Permanent for this item only; the engine is unaffected.
    #[error("item of {size} bytes exceeds ring payload capacity of {capacity} bytes")]
    TooBig {
        /// Size of the frame the item would need.
        size: usize,
        /// Total payload capacity of the ring.
        capacity: u64,
    },

    /// The client handler rejected a batch. The consumer pointer is not
    /// advanced; the batch is retried on a future start.
    #[error("handler rejected batch: {0}")]
    Handler(HandlerError),

    /// The operation arrived after shutdown had begun.
    #[error("journal is shut down")]
    Shutdown,

    /// The engine stopped earlier on a fatal error; the original reason is
    /// carried along.
    #[error("journal failed: {0}")]
    Failed(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
