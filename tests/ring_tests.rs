//! Integration tests for the durable ring: layout, publication,
//! wraparound, and persistence across reopen.

use ring_journal::{
    Consumer, Error, FileDevice, MemoryDevice, Producer, PushStatus, Ring, RingState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

// Helper struct to manage temporary test directories
struct TestContext {
    _temp_dir: TempDir, // Keep the TempDir alive for the test duration
    device_path: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = tempdir().unwrap();
        let device_path = temp_dir.path().join("ring.dat");

        Self {
            _temp_dir: temp_dir,
            device_path,
        }
    }
}

fn publish(producer: &Producer, payload: &[u8]) -> u64 {
    match producer.try_push(payload).unwrap() {
        PushStatus::Accepted(end) => {
            producer.advance(end).unwrap();
            end
        }
        other => panic!("push not accepted: {other:?}"),
    }
}

#[test]
fn file_ring_survives_reopen() {
    let context = TestContext::new();

    {
        let device = Arc::new(FileDevice::open(&context.device_path, 512, 8).unwrap());
        let ring = Arc::new(Ring::create(device).unwrap());
        let producer = Producer::attach(ring.clone());

        publish(&producer, b"survives");
        publish(&producer, b"a reopen");
    }

    let device = Arc::new(FileDevice::open(&context.device_path, 512, 8).unwrap());
    let ring = Arc::new(Ring::attach(device).unwrap());
    let consumer = Consumer::attach(ring);

    let (end, frames) = consumer
        .fold(Vec::new(), |mut acc, _, bytes| {
            acc.push(bytes);
            acc
        })
        .unwrap();
    assert_eq!(frames, vec![b"survives".to_vec(), b"a reopen".to_vec()]);

    consumer.advance(end).unwrap();
    assert!(consumer.pop().unwrap().is_none());
}

#[test]
fn unpublished_frames_are_invisible_after_reattach() {
    let context = TestContext::new();

    {
        let device = Arc::new(FileDevice::open(&context.device_path, 512, 8).unwrap());
        let ring = Arc::new(Ring::create(device).unwrap());
        let producer = Producer::attach(ring.clone());

        publish(&producer, b"published");
        // Written durably but never advanced: a crash here must hide it.
        producer.try_push(b"torn").unwrap();
    }

    let device = Arc::new(FileDevice::open(&context.device_path, 512, 8).unwrap());
    let ring = Arc::new(Ring::attach(device).unwrap());
    let consumer = Consumer::attach(ring);

    let (_, frames) = consumer
        .fold(Vec::new(), |mut acc, _, bytes| {
            acc.push(bytes);
            acc
        })
        .unwrap();
    assert_eq!(frames, vec![b"published".to_vec()], "only the published frame is visible");
}

#[test]
fn pointers_advance_by_exact_frame_sizes_across_wraps() {
    // 512-byte payload region; 64-byte frames divide it exactly, so twenty
    // pushes wrap the region twice with no sentinel gaps.
    let device = Arc::new(MemoryDevice::new(512, 2));
    let ring = Arc::new(Ring::create(device).unwrap());
    let producer = Producer::attach(ring.clone());
    let consumer = Consumer::attach(ring.clone());

    for i in 0..20u8 {
        let end = publish(&producer, &[i; 60]);
        assert_eq!(end, (i as u64 + 1) * 64);

        let (frame_end, bytes) = consumer.pop().unwrap().unwrap();
        assert_eq!(bytes, [i; 60]);
        consumer.advance(frame_end).unwrap();
    }

    assert_eq!(ring.positions(), (1280, 1280));
}

#[test]
fn every_item_round_trips_across_a_sentinel_wrap() {
    // Frames of 300 bytes do not divide the 1024-byte region: the second
    // push needs a sentinel skip at offset 600.
    let device = Arc::new(MemoryDevice::new(512, 3));
    let ring = Arc::new(Ring::create(device).unwrap());
    let producer = Producer::attach(ring.clone());
    let consumer = Consumer::attach(ring);

    for i in 0..10u8 {
        publish(&producer, &[i; 296]);
        let (end, bytes) = consumer.pop().unwrap().unwrap();
        assert_eq!(bytes, [i; 296]);
        consumer.advance(end).unwrap();
    }
}

#[test]
fn suspend_and_resume_via_the_header_flag() {
    let device = Arc::new(MemoryDevice::new(512, 4));
    let ring = Arc::new(Ring::create(device.clone()).unwrap());
    let producer = Producer::attach(ring.clone());
    let consumer = Consumer::attach(ring.clone());

    consumer.suspend().unwrap();
    assert_eq!(ring.state(), RingState::Suspended);
    assert_eq!(producer.try_push(b"held").unwrap(), PushStatus::Suspended);

    // The flag is durable, not just cached.
    let reattached = Ring::attach(device).unwrap();
    assert_eq!(reattached.state(), RingState::Suspended);

    consumer.resume().unwrap();
    assert_eq!(ring.state(), RingState::Running);
    assert!(matches!(producer.try_push(b"flows").unwrap(), PushStatus::Accepted(_)));
}

#[test]
fn device_faults_surface_as_io_errors() {
    let device = Arc::new(MemoryDevice::new(512, 4));
    let ring = Arc::new(Ring::create(device.clone()).unwrap());
    let producer = Producer::attach(ring);

    device.set_failing(true);
    assert!(matches!(producer.try_push(b"doomed"), Err(Error::Io(_))));

    device.set_failing(false);
    assert!(matches!(producer.try_push(b"fine").unwrap(), PushStatus::Accepted(_)));
}

#[test]
fn free_space_accounts_for_wrap_skips() {
    let device = Arc::new(MemoryDevice::new(512, 3));
    let ring = Arc::new(Ring::create(device).unwrap());
    let producer = Producer::attach(ring.clone());
    let consumer = Consumer::attach(ring);

    // Fill to 600 of 1024, consume everything.
    let end = publish(&producer, &[0u8; 596]);
    consumer.advance(end).unwrap();

    // The next 600-byte frame needs 424 skipped bytes plus itself: exactly
    // the whole region. A larger one must report Full, not corrupt state.
    assert_eq!(producer.try_push(&[1u8; 600]).unwrap(), PushStatus::Full);
    assert!(matches!(producer.try_push(&[1u8; 596]).unwrap(), PushStatus::Accepted(_)));
}
