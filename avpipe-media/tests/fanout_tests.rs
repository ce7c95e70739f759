//! Concurrency tests for the output fanout

mod common;

use avpipe_media::*;
use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Panics on any torn or invalid frame
#[derive(Debug, Default)]
struct CheckingSink {
    inner: RecordingVideoSink,
}

impl VideoSink for CheckingSink {
    fn name(&self) -> &str {
        "checking"
    }

    fn is_format_supported(&self, format: PixelFormat) -> bool {
        format == PixelFormat::Yuv420p
    }

    fn preferred_format(&self) -> PixelFormat {
        PixelFormat::Yuv420p
    }

    fn receive(&self, frame: &VideoFrame) {
        assert!(frame.is_valid(), "sink received an invalid frame");
        self.inner.receive(frame);
    }
}

fn frame(i: usize) -> VideoFrame {
    VideoFrame::new(i as f64 * 0.01, 4, 4, PixelFormat::Yuv420p, vec![i as u8; 24])
}

// ============================================================================
// MEMBERSHIP UNDER LOAD
// ============================================================================

#[test]
fn test_deliver_while_sinks_change() {
    let fanout: Arc<OutputFanout<dyn VideoSink>> = Arc::new(OutputFanout::new());
    let permanent = Arc::new(CheckingSink::default());
    fanout.add_sink(permanent.clone());

    let running = Arc::new(AtomicBool::new(true));
    let churn = {
        let fanout = fanout.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut cycles = 0usize;
            while running.load(Ordering::SeqCst) {
                let id = fanout.add_sink(Arc::new(CheckingSink::default()));
                thread::yield_now();
                assert!(fanout.remove_sink(id).is_some());
                cycles += 1;
            }
            cycles
        })
    };

    for i in 0..1000 {
        let delivered = fanout.deliver(&frame(i));
        assert!(delivered >= 1);
    }
    running.store(false, Ordering::SeqCst);
    let cycles = churn.join().expect("churn thread panicked");

    assert!(cycles > 0);
    assert_eq!(permanent.inner.count(), 1000);
    assert_eq!(fanout.len(), 1);
    let timestamps = permanent.inner.timestamps();
    assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_removed_sink_receives_nothing_more() {
    let fanout: Arc<OutputFanout<dyn VideoSink>> = Arc::new(OutputFanout::new());
    let kept = Arc::new(CheckingSink::default());
    let removed = Arc::new(CheckingSink::default());
    fanout.add_sink(kept.clone());
    let id = fanout.add_sink(removed.clone());

    fanout.deliver(&frame(1));
    assert!(fanout.remove_sink(id).is_some());
    assert!(fanout.remove_sink(id).is_none());
    fanout.deliver(&frame(2));

    assert_eq!(kept.inner.count(), 2);
    assert_eq!(removed.inner.count(), 1);
}

// ============================================================================
// BACKPRESSURE
// ============================================================================

/// Holds the producer for a fixed time on every frame
#[derive(Debug)]
struct SlowSink {
    hold: Duration,
}

impl VideoSink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    fn is_format_supported(&self, _format: PixelFormat) -> bool {
        true
    }

    fn preferred_format(&self) -> PixelFormat {
        PixelFormat::Yuv420p
    }

    fn receive(&self, _frame: &VideoFrame) {}

    fn can_pause(&self) -> bool {
        true
    }

    fn request_pause(&self, timeout: Duration) -> bool {
        thread::sleep(self.hold.min(timeout));
        self.hold < timeout
    }
}

#[test]
fn test_pause_request_does_not_block_membership() {
    let fanout: Arc<OutputFanout<dyn VideoSink>> = Arc::new(OutputFanout::new());
    fanout.add_sink(Arc::new(SlowSink {
        hold: Duration::from_millis(200),
    }));
    assert!(fanout.can_pause());

    let waiter = {
        let fanout = fanout.clone();
        thread::spawn(move || fanout.request_pause(Duration::from_millis(500)))
    };
    thread::sleep(Duration::from_millis(20));

    let extra = Arc::new(CheckingSink::default());
    let start = std::time::Instant::now();
    fanout.add_sink(extra);
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(fanout.len(), 2);

    assert!(waiter.join().expect("pause thread panicked"));
}

#[test]
fn test_sink_without_pause_support_is_not_held() {
    let fanout: Arc<OutputFanout<dyn VideoSink>> = Arc::new(OutputFanout::new());
    fanout.add_sink(Arc::new(CheckingSink::default()));
    assert!(!fanout.can_pause());

    let start = std::time::Instant::now();
    assert!(!fanout.request_pause(Duration::from_millis(500)));
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(!CheckingSink::default().request_pause(Duration::from_millis(500)));
}
