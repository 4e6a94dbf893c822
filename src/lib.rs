//! Ring Journal - A persistent write-ahead journal on a block-device
//! ring buffer with at-least-once replay.
//!
//! # Overview
//!
//! The crate couples two pieces:
//!
//! 1. A variable-length ring buffer persisted on a raw block device, whose
//!    producer and consumer coordinate only through durable bytes
//! 2. A journal engine layering crash recovery, backpressure, and
//!    completion notification on top of that ring
//!
//! Once a push is accepted, the operation will be applied to the
//! client-supplied handler at least once, even if the host dies
//! immediately afterwards: frame bytes are made durable before the
//! producer pointer publishes them, and the consumer pointer advances only
//! after the handler has succeeded.
//!
//! # Key Features
//!
//! - Monotonic 64-bit positions; wraparound is a storage detail
//! - Two-phase publication, so torn frames are unobservable after a crash
//! - Start-time replay of everything left in the ring
//! - One background drain thread with natural batching
//! - Bounded-buffer backpressure through cooperative waiting
//! - Pluggable block devices (file-backed and in-memory included)
//!
//! # Usage
//!
//! A journal is typically used by:
//! 1. Opening a [`BlockDevice`] (for example a [`FileDevice`])
//! 2. Calling [`Journal::start`] with a [`Codec`] and an idempotent handler
//! 3. Pushing operations and, where needed, waiting on their [`Completion`]s
//! 4. Calling [`Journal::shutdown`] for an orderly stop
//!
//! See the integration tests for end-to-end examples, including crash
//! recovery.

#![deny(missing_docs)]

mod codec;
mod device;
mod error;
mod journal;
mod ring;

pub use codec::{BytesCodec, Codec, StringCodec};
pub use device::{BlockDevice, FileDevice, MemoryDevice};
pub use error::{Error, HandlerError, Result};
pub use journal::{Completion, Handler, Journal};
pub use ring::consumer::Consumer;
pub use ring::producer::{Producer, PushStatus};
pub use ring::{Ring, RingState, FORMAT_VERSION, FRAME_HEADER_LEN, MAGIC, WRAP_SENTINEL};
