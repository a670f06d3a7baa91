//! End-to-end transfers between a producer and a consumer thread.
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=shmpipe=trace cargo test --features tracing --test pipe -- --nocapture
//! ```

use std::sync::Once;
use std::thread;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use shmpipe::{QueueConfig, QueueError, SpscQueue};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        shmpipe::init_tracing();
    });
}

/// Byte `i` of the stream, so a reader can check order without sharing state.
fn stream_byte(i: u64) -> u8 {
    (i.wrapping_mul(31) ^ (i >> 7)) as u8
}

#[test]
fn test_ten_messages_through_small_queue() {
    init_test_tracing();
    let (mut tx, mut rx) = SpscQueue::create_anonymous(4096).unwrap().split();

    let writer = thread::spawn(move || {
        for i in 0..10u8 {
            tx.write_from(&[i; 1024]).unwrap();
        }
        tx
    });

    let mut total = 0;
    let mut buf = [0u8; 1024];
    for i in 0..10u8 {
        rx.read_to(&mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == i), "message {i} corrupted");
        total += buf.len();
    }

    let tx = writer.join().unwrap();
    assert_eq!(total, 10240);
    assert_eq!(rx.len(), 0);
    assert_eq!(tx.queue().len(), 0);
}

#[test]
fn test_oversized_transfer_is_rejected_not_blocked() {
    let (mut tx, mut rx) = SpscQueue::create_anonymous(1024).unwrap().split();

    let err = tx.write_blocking(2000).unwrap_err();
    assert_eq!(
        err,
        QueueError::ExceedsCapacity {
            requested: 2000,
            capacity: 1024
        }
    );
    assert!(err.is_contract_violation());

    assert!(matches!(
        rx.read_blocking(2000),
        Err(QueueError::ExceedsCapacity { .. })
    ));
    assert!(tx.queue().is_empty());
}

#[test]
fn test_full_capacity_transfer_round_trips() {
    let (mut tx, mut rx) = SpscQueue::create_anonymous(8192).unwrap().split();
    let payload: Vec<u8> = (0..8192u64).map(stream_byte).collect();

    // Move the offsets off zero so the transfer straddles the wrap point.
    tx.write_from(&[0u8; 3000]).unwrap();
    rx.commit(3000).unwrap();

    tx.write_from(&payload).unwrap();
    assert!(tx.queue().is_full());

    let got = rx.read_blocking(8192).unwrap().to_vec();
    rx.commit(8192).unwrap();
    assert_eq!(got, payload);
}

#[test]
fn test_sub_page_queue_reads_in_other_chunks_than_written() {
    let (mut tx, mut rx) = SpscQueue::create_anonymous(1024).unwrap().split();

    // Park both offsets just below the capacity so the next write runs past it.
    tx.write_from(&[0u8; 1000]).unwrap();
    rx.commit(1000).unwrap();

    let payload: Vec<u8> = (1..=100).collect();
    tx.write_from(&payload).unwrap();

    let mut head = [0u8; 24];
    let mut tail = [0u8; 76];
    rx.read_to(&mut head).unwrap();
    rx.read_to(&mut tail).unwrap();
    assert_eq!(head.as_slice(), &payload[..24]);
    assert_eq!(tail.as_slice(), &payload[24..]);
}

#[test]
fn test_sub_page_queue_unequal_chunks_over_many_laps() {
    let (mut tx, mut rx) = SpscQueue::create_anonymous(1024).unwrap().split();
    let total = 64 * 1024u64;
    let mut sent = 0u64;
    let mut received = 0u64;
    let mut buf = [0u8; 61];

    while received < total {
        while sent < total {
            let len = 97.min((total - sent) as usize);
            let chunk: Vec<u8> = (sent..sent + len as u64).map(stream_byte).collect();
            if tx.try_write_from(&chunk).is_err() {
                break;
            }
            sent += len as u64;
        }

        let len = buf.len().min((sent - received) as usize);
        rx.read_to(&mut buf[..len]).unwrap();
        for (i, &b) in buf[..len].iter().enumerate() {
            assert_eq!(b, stream_byte(received + i as u64), "byte {}", received + i as u64);
        }
        received += len as u64;
    }
}

#[test]
fn test_blocked_writer_resumes_after_reader_drains() {
    init_test_tracing();
    let config = QueueConfig::new(4096).spin_limit(0);
    let (mut tx, mut rx) = SpscQueue::anonymous(&config).unwrap().split();
    tx.write_from(&[1u8; 4096]).unwrap();

    let writer = thread::spawn(move || {
        tx.write_from(&[2u8; 2048]).unwrap();
        tx
    });

    let mut buf = [0u8; 4096];
    rx.read_to(&mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 1));

    let mut tail = [0u8; 2048];
    rx.read_to(&mut tail).unwrap();
    assert!(tail.iter().all(|&b| b == 2));

    writer.join().unwrap();
}

/// Random transfer sizes with a reader that sometimes stalls, checked against
/// a deterministic byte stream.
fn run_fuzz(seed: u64, capacity: usize, spin_limit: u32, total: u64) {
    let config = QueueConfig::new(capacity).spin_limit(spin_limit);
    let (mut tx, mut rx) = SpscQueue::anonymous(&config).unwrap().split();
    let max_chunk = capacity / 4;

    let writer = thread::spawn(move || {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut sent = 0u64;
        while sent < total {
            let len = rng.random_range(1..=max_chunk).min((total - sent) as usize);
            tx.write_with(len, |buf| {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = stream_byte(sent + i as u64);
                }
            })
            .unwrap();
            sent += len as u64;
        }
        tx.stats()
    });

    let mut rng = SmallRng::seed_from_u64(seed ^ 0x5eed);
    let mut received = 0u64;
    while received < total {
        let len = rng.random_range(1..=max_chunk).min((total - received) as usize);
        if rng.random_range(0..64) == 0 {
            thread::yield_now();
        }
        rx.read_with(len, |buf| {
            for (i, &b) in buf.iter().enumerate() {
                assert_eq!(b, stream_byte(received + i as u64), "byte {}", received + i as u64);
            }
        })
        .unwrap();
        received += len as u64;
    }

    let writer_stats = writer.join().unwrap();
    assert!(rx.is_empty());
    assert_eq!(rx.queue().free_space(), capacity);
    // Wakes only ever go to a peer that published a pending request.
    assert!(writer_stats.wakes + writer_stats.elided_wakes <= total);
}

#[test]
fn test_fuzz_spinning() {
    run_fuzz(1, 4096, 64, 4 << 20);
}

#[test]
fn test_fuzz_parking() {
    run_fuzz(2, 1024, 0, 2 << 20);
}

#[test]
fn test_fuzz_large_queue() {
    run_fuzz(3, 1 << 16, 16, 8 << 20);
}
