//! Journal engine: at-least-once replay over the durable ring
//!
//! The engine couples a [`Producer`] and [`Consumer`] on one ring with a
//! client-supplied codec and handler:
//!
//! - `start` attaches (or creates) the ring, synchronously replays every
//!   frame left in `[C, P)` through the handler, then launches a single
//!   background drain thread
//! - `push` frames one operation with backpressure and hands back a
//!   [`Completion`] that blocks until the operation is durably consumed
//! - the drain thread batches naturally: one replay pass folds everything
//!   visible, so pushes arriving faster than the handler drains collapse
//!   into fewer, larger batches
//! - `shutdown` stops the drain thread and leaves durable state intact for
//!   the next start
//!
//! One condition variable covers the three events waiters care about
//! (space freed, new items visible, shutdown progress), so every state
//! change broadcasts and every waiter re-checks its own predicate.
//!
//! Anything that could silently lose an accepted item is fatal and sticky:
//! a frame the codec cannot decode, an I/O failure while advancing after
//! handler success, or a handler rejection. The drain thread stops, the
//! fault is readable via [`Journal::fault`], and the unconsumed items are
//! replayed by the next `start` on the same device.

use crate::codec::Codec;
use crate::device::BlockDevice;
use crate::error::{Error, HandlerError, Result};
use crate::ring::consumer::Consumer;
use crate::ring::producer::{Producer, PushStatus};
use crate::ring::Ring;
use crossbeam_utils::CachePadded;
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a blocked push sleeps before re-checking free space. The
/// condvar is broadcast on every consume, but the free-space predicate
/// lives on the device rather than under the state mutex, so the wait is
/// bounded instead of relying on wakeups alone.
const PUSH_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Applies batches of decoded operations.
///
/// Must be idempotent: across engine restarts the same operation can
/// appear in more than one batch, because a crash can land between handler
/// success and the durable consumer advance. Closures of the matching
/// shape implement this automatically.
pub trait Handler<T>: Send + Sync + 'static {
    /// Apply one batch, in push order. An `Err` stops the engine without
    /// advancing the consumer pointer; the batch is retried on a future
    /// start.
    fn apply(&self, batch: Vec<T>) -> std::result::Result<(), HandlerError>;
}

impl<T, F> Handler<T> for F
where
    F: Fn(Vec<T>) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    fn apply(&self, batch: Vec<T>) -> std::result::Result<(), HandlerError> {
        self(batch)
    }
}

/// Engine state guarded by the single state mutex.
struct DrainState {
    /// Highest durably consumed position, once the first replay finishes.
    consumed: Option<u64>,
    /// New frames were published since the last replay pass.
    dirty: bool,
    /// Shutdown has been requested.
    please_shutdown: bool,
    /// The drain thread has exited (orderly or faulted).
    shutdown_complete: bool,
    /// First fatal error, if the drain thread stopped on one.
    fault: Option<String>,
}

struct Shared<C: Codec> {
    producer: Producer,
    consumer: Consumer,
    codec: C,
    handler: Box<dyn Handler<C::Item>>,
    /// Serializes framing + publication across concurrent pushers.
    push_lock: Mutex<()>,
    state: Mutex<DrainState>,
    /// One condvar for space freed, items visible, and shutdown progress.
    cond: Condvar,
    /// Fast-path mirror of `please_shutdown`, padded off the hot path.
    shutdown: CachePadded<AtomicBool>,
}

impl<C: Codec> Shared<C> {
    /// One replay pass: fold everything visible, decode, apply, consume.
    fn replay(&self) -> Result<()> {
        let (end, frames) = self.consumer.fold(Vec::new(), |mut batch, pos, bytes| {
            batch.push((pos, bytes));
            batch
        })?;

        if !frames.is_empty() {
            let mut batch = Vec::with_capacity(frames.len());
            for (pos, bytes) in &frames {
                match self.codec.decode(bytes) {
                    Some(item) => batch.push(item),
                    None => {
                        error!(
                            "replay: codec rejected {}-byte frame at position {pos}",
                            bytes.len()
                        );
                        return Err(Error::Parse {
                            position: *pos,
                            detail: format!("codec rejected {}-byte frame", bytes.len()),
                        });
                    }
                }
            }

            debug!("replaying {} items up to position {end}", batch.len());
            self.handler.apply(batch).map_err(Error::Handler)?;
            self.consumer.advance(end)?;
        }

        let mut state = self.state.lock();
        state.consumed = Some(end);
        self.cond.notify_all();
        Ok(())
    }

    /// Fail fast when the engine is shutting down or already faulted.
    fn check_live(&self) -> Result<()> {
        let state = self.state.lock();
        if let Some(reason) = &state.fault {
            return Err(Error::Failed(reason.clone()));
        }
        if state.please_shutdown {
            return Err(Error::Shutdown);
        }
        Ok(())
    }
}

/// The background drain loop: one thread per engine.
fn drain_loop<C: Codec>(shared: Arc<Shared<C>>) {
    debug!("drain thread running");
    loop {
        {
            let mut state = shared.state.lock();
            while !state.dirty && !state.please_shutdown {
                shared.cond.wait(&mut state);
            }
            if state.please_shutdown {
                state.shutdown_complete = true;
                shared.cond.notify_all();
                debug!("drain thread stopped: shutdown");
                return;
            }
            state.dirty = false;
        }

        if let Err(err) = shared.replay() {
            error!("drain thread stopped: {err}");
            let mut state = shared.state.lock();
            state.fault = Some(err.to_string());
            state.shutdown_complete = true;
            shared.cond.notify_all();
            return;
        }
    }
}

/// A persistent at-least-once journal over a block device.
///
/// Dropping the handle without [`shutdown`](Journal::shutdown) behaves
/// like a crash: the drain thread is signalled but not joined, durable
/// state stays put, and the next [`start`](Journal::start) on the same
/// device replays whatever was not yet consumed.
pub struct Journal<C: Codec> {
    shared: Arc<Shared<C>>,
    drain: Option<JoinHandle<()>>,
}

impl<C: Codec> Journal<C> {
    /// Start an engine on `device`.
    ///
    /// Attaches to the existing ring, or initializes one if the device has
    /// never held a ring. Every frame already in `[C, P)` is replayed
    /// through `handler` before this returns; a decode or handler failure
    /// here fails the start and leaves the ring untouched.
    pub fn start<H>(device: Arc<dyn BlockDevice>, codec: C, handler: H) -> Result<Self>
    where
        H: Handler<C::Item>,
    {
        let ring = match Ring::attach(Arc::clone(&device)) {
            Ok(ring) => ring,
            Err(Error::Unformatted) => Ring::create(device)?,
            Err(err) => return Err(err),
        };
        let ring = Arc::new(ring);

        let shared = Arc::new(Shared {
            producer: Producer::attach(Arc::clone(&ring)),
            consumer: Consumer::attach(ring),
            codec,
            handler: Box::new(handler),
            push_lock: Mutex::new(()),
            state: Mutex::new(DrainState {
                consumed: None,
                dirty: false,
                please_shutdown: false,
                shutdown_complete: false,
                fault: None,
            }),
            cond: Condvar::new(),
            shutdown: CachePadded::new(AtomicBool::new(false)),
        });

        // Catch up on whatever the previous incarnation left behind before
        // accepting new work.
        shared.replay()?;

        let drain = thread::Builder::new()
            .name("journal-drain".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || drain_loop(shared)
            })?;

        Ok(Self {
            shared,
            drain: Some(drain),
        })
    }

    /// Append one operation, blocking while the ring is full or suspended.
    ///
    /// On success the frame is durably written and published; the returned
    /// [`Completion`] blocks until the handler has processed it and the
    /// consumer pointer has durably passed it. [`Error::TooBig`] rejects
    /// only this item; [`Error::Shutdown`] and [`Error::Failed`] mean the
    /// engine is no longer accepting work.
    pub fn push(&self, item: &C::Item) -> Result<Completion<C>> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        self.shared.check_live()?;

        let _guard = self.shared.push_lock.lock();
        let payload = self.shared.codec.encode(item);

        loop {
            match self.shared.producer.try_push(&payload)? {
                PushStatus::Accepted(pos) => {
                    self.shared.producer.advance(pos)?;

                    let mut state = self.shared.state.lock();
                    state.dirty = true;
                    self.shared.cond.notify_all();

                    return Ok(Completion {
                        shared: Arc::clone(&self.shared),
                        position: pos,
                    });
                }
                PushStatus::Full | PushStatus::Suspended => {
                    let mut state = self.shared.state.lock();
                    if let Some(reason) = &state.fault {
                        return Err(Error::Failed(reason.clone()));
                    }
                    if state.please_shutdown {
                        return Err(Error::Shutdown);
                    }
                    let _ = self.shared.cond.wait_for(&mut state, PUSH_RETRY_INTERVAL);
                }
            }
        }
    }

    /// Durably suspend the ring: subsequent pushes block until resume.
    pub fn suspend(&self) -> Result<()> {
        self.shared.consumer.suspend()
    }

    /// Durably resume a suspended ring and wake blocked pushers.
    pub fn resume(&self) -> Result<()> {
        self.shared.consumer.resume()?;
        let _state = self.shared.state.lock();
        self.shared.cond.notify_all();
        Ok(())
    }

    /// The fatal error that stopped the drain thread, if any.
    pub fn fault(&self) -> Option<String> {
        self.shared.state.lock().fault.clone()
    }

    /// Stop the engine: drain any in-flight replay, stop the drain thread,
    /// and detach. Durable state is left intact; items pushed but not yet
    /// consumed are replayed by the next start.
    ///
    /// Returns [`Error::Failed`] if the drain thread had already stopped on
    /// a fatal error.
    pub fn shutdown(mut self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let mut state = self.shared.state.lock();
            state.please_shutdown = true;
            self.shared.cond.notify_all();
            while !state.shutdown_complete {
                self.shared.cond.wait(&mut state);
            }
        }

        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }

        let state = self.shared.state.lock();
        match &state.fault {
            Some(reason) => Err(Error::Failed(reason.clone())),
            None => Ok(()),
        }
    }
}

impl<C: Codec> Drop for Journal<C> {
    fn drop(&mut self) {
        if self.drain.is_some() {
            // Crash-like teardown: signal the drain thread and leave. No
            // join, so a handler stuck mid-batch cannot hang the drop; the
            // thread holds its own Arc and exits at its next wakeup.
            self.shared.shutdown.store(true, Ordering::SeqCst);
            let mut state = self.shared.state.lock();
            state.please_shutdown = true;
            self.shared.cond.notify_all();
        }
    }
}

/// Waits for one pushed operation to be durably consumed.
///
/// Returned by [`Journal::push`]. `wait` returns `Ok` only once the
/// handler has successfully processed a batch containing the operation and
/// the consumer pointer has durably advanced past it.
pub struct Completion<C: Codec> {
    shared: Arc<Shared<C>>,
    position: u64,
}

impl<C: Codec> Completion<C> {
    /// The publication position of the pushed operation.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Block until the operation is durably consumed.
    ///
    /// Returns [`Error::Failed`] if the engine faults first and
    /// [`Error::Shutdown`] if it shuts down before draining this far.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if state.consumed.map_or(false, |consumed| consumed >= self.position) {
                return Ok(());
            }
            if let Some(reason) = &state.fault {
                return Err(Error::Failed(reason.clone()));
            }
            if state.shutdown_complete {
                return Err(Error::Shutdown);
            }
            self.shared.cond.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringCodec;
    use crate::device::MemoryDevice;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        seen: Arc<PlMutex<Vec<String>>>,
    }

    impl Handler<String> for Recorder {
        fn apply(&self, batch: Vec<String>) -> std::result::Result<(), HandlerError> {
            self.seen.lock().extend(batch);
            Ok(())
        }
    }

    fn engine(device: Arc<MemoryDevice>) -> (Journal<StringCodec>, Arc<PlMutex<Vec<String>>>) {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let journal = Journal::start(device, StringCodec, Recorder { seen: seen.clone() }).unwrap();
        (journal, seen)
    }

    #[test]
    fn push_wait_shutdown() {
        let device = Arc::new(MemoryDevice::new(512, 9));
        let (journal, seen) = engine(device);

        journal.push(&"hello".to_string()).unwrap().wait().unwrap();
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);

        journal.shutdown().unwrap();
    }

    #[test]
    fn restart_after_shutdown_accepts_pushes() {
        let device = Arc::new(MemoryDevice::new(512, 9));
        let (journal, _) = engine(device.clone());
        journal.shutdown().unwrap();

        let (journal, _) = engine(device);
        let probe = journal.push(&"probe".to_string()).unwrap();
        probe.wait().unwrap();
        drop(journal);
    }

    #[test]
    fn completion_positions_grow_with_frames() {
        let device = Arc::new(MemoryDevice::new(512, 9));
        let (journal, _) = engine(device);

        let first = journal.push(&"ab".to_string()).unwrap();
        let second = journal.push(&"cd".to_string()).unwrap();
        assert_eq!(first.position(), 6);
        assert_eq!(second.position(), 12);

        second.wait().unwrap();
        journal.shutdown().unwrap();
    }
}
