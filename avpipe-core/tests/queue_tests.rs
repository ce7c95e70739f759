//! Integration tests for the packet queue
//!
//! Exercises blocking take, stop/clear wake-ups and FIFO order across
//! producer and consumer threads.

use avpipe_core::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_take_blocks_until_push() {
    let queue = Arc::new(PacketQueue::new());
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.take())
    };
    thread::sleep(Duration::from_millis(20));
    queue.push(Packet::new(vec![1u8, 2, 3], 0.5).with_key_frame(true));

    let packet = consumer.join().unwrap().expect("packet should be delivered");
    assert_eq!(packet.pts, 0.5);
    assert!(packet.is_key_frame);
    assert_eq!(packet.remaining(), &[1, 2, 3]);
}

#[test]
fn test_stop_unblocks_waiting_take() {
    let queue = Arc::new(PacketQueue::new());
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let result = queue.take();
            (result.is_none(), start.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(20));
    queue.stop();

    let (stopped, waited) = consumer.join().unwrap();
    assert!(stopped);
    assert!(waited < Duration::from_secs(1));
    assert!(queue.is_stopped());
}

#[test]
fn test_stopped_queue_refuses_pending_units_until_restart() {
    let queue = PacketQueue::new();
    queue.push(Packet::new(vec![0u8], 1.0));
    queue.stop();
    assert!(queue.take_timeout(Duration::from_millis(5)).is_none());

    queue.restart();
    assert!(queue.take_timeout(Duration::from_millis(5)).is_some());
}

#[test]
fn test_clear_drops_pending_units() {
    let queue = PacketQueue::new();
    for i in 0..10 {
        queue.push(Packet::new(vec![i as u8], i as f64));
    }
    assert_eq!(queue.size(), 10);
    queue.clear();
    assert!(queue.is_empty());
    assert!(queue.take_timeout(Duration::from_millis(5)).is_none());
}

#[test]
fn test_fifo_across_threads() {
    let queue = Arc::new(PacketQueue::with_capacity(8));
    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 0..500 {
                while queue.is_full() {
                    thread::yield_now();
                }
                queue.push(Packet::new(vec![(i % 256) as u8], i as f64));
            }
            queue.push(Packet::end_of_stream());
        })
    };

    let mut expected = 0.0;
    loop {
        let packet = queue
            .take_timeout(Duration::from_secs(2))
            .expect("producer stalled");
        if packet.is_end_of_stream() {
            break;
        }
        assert_eq!(packet.pts, expected);
        expected += 1.0;
    }
    producer.join().unwrap();
    assert_eq!(expected, 500.0);
}
