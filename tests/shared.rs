//! Two handles on one named shared memory ring, as a collector and a
//! consumer process would hold them

use capture_ring::{Corruption, RegionKind, RingBuffer, RingConfig, RingError};
use std::thread;

#[test]
fn test_open_shared_sees_owner_state() {
    let name = "test_shared_roundtrip";
    let owner = RingBuffer::create_shared(name, &RingConfig::new(16 * 1024).with_threshold(0.75)).unwrap();
    let producer = RingBuffer::open_shared(name).unwrap();

    assert_eq!(owner.backing(), RegionKind::Shared);
    assert_eq!(producer.capacity(), 16 * 1024);
    assert_eq!(producer.threshold(), 0.75);
    assert_eq!(producer.name(), Some(name));

    for i in 0..100u32 {
        producer.write(format!("screen:frame-{i}").as_bytes()).unwrap();
    }
    assert_eq!(owner.stats().messages_written, 100);

    let mut consumer = owner.consumer().unwrap();
    for i in 0..100u32 {
        let msg = consumer.read().unwrap();
        assert_eq!(msg.payload(), format!("screen:frame-{i}").as_bytes());
    }
    assert!(matches!(consumer.read(), Err(RingError::Empty)));
    assert_eq!(producer.stats().messages_read, 100);
    assert_eq!(producer.utilization(), 0.0);
}

#[test]
fn test_consumer_slot_is_shared_across_handles() {
    let name = "test_shared_consumer_slot";
    let owner = RingBuffer::create_shared(name, &RingConfig::new(4096)).unwrap();
    let other = RingBuffer::open_shared(name).unwrap();

    let consumer = owner.consumer().unwrap();
    assert!(matches!(other.consumer(), Err(RingError::ConsumerAttached)));
    drop(consumer);
    assert!(other.consumer().is_ok());
}

#[test]
fn test_cross_handle_threads() {
    let name = "test_shared_threads";
    let owner = RingBuffer::create_shared(name, &RingConfig::new(32 * 1024)).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            let producer = RingBuffer::open_shared(name).unwrap();
            let mut sent = 0u32;
            while sent < 5_000 {
                match producer.write(&sent.to_le_bytes()) {
                    Ok(()) => sent += 1,
                    Err(e) if e.is_retryable() => thread::yield_now(),
                    Err(e) => panic!("{e}"),
                }
            }
        });

        let mut consumer = owner.consumer().unwrap();
        let mut expected = 0u32;
        while expected < 5_000 {
            match consumer.read() {
                Ok(msg) => {
                    assert_eq!(msg.payload(), &expected.to_le_bytes());
                    expected += 1;
                }
                Err(RingError::Empty) => thread::yield_now(),
                Err(e) => panic!("{e}"),
            }
        }
    });
}

#[test]
fn test_open_missing_and_unlinked() {
    assert!(matches!(
        RingBuffer::open_shared("test_shared_never_created"),
        Err(RingError::ShmOpen { .. })
    ));

    let name = "test_shared_unlinked";
    RingBuffer::create_shared(name, &RingConfig::new(1024)).unwrap().destroy();
    assert!(RingBuffer::open_shared(name).is_err());
}

#[test]
fn test_open_rejects_foreign_object() {
    // A shared object of the right size that was never initialized as a ring
    let name = "test_shared_foreign";
    let region = capture_ring::shm::Region::create_shared(name, 64 * 1024).unwrap();
    assert!(matches!(
        RingBuffer::open_shared(name),
        Err(RingError::Corrupted(Corruption::RingMagic { got: 0, .. }))
    ));
    drop(region);
}
