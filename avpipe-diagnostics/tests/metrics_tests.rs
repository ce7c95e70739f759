//! Tests for the pipeline metrics collector

use avpipe_core::metrics::keys;
use avpipe_core::{MetricsRecorder, SharedMetrics};
use avpipe_diagnostics::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_counters_from_many_threads() {
    let metrics = Arc::new(PipelineMetrics::new());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let metrics = metrics.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    metrics.increment(keys::VIDEO_FRAMES_DELIVERED);
                    metrics.increment(keys::AUDIO_CHUNKS_PLAYED);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(metrics.counter(keys::VIDEO_FRAMES_DELIVERED), 1000);
    assert_eq!(metrics.counter(keys::AUDIO_CHUNKS_PLAYED), 1000);
    assert_eq!(metrics.counter(keys::VIDEO_GOPS_ABANDONED), 0);
}

#[test]
fn test_usable_as_shared_recorder() {
    let metrics = Arc::new(PipelineMetrics::new());
    let shared: SharedMetrics = metrics.clone();
    shared.increment(keys::VIDEO_FRAMES_LATE);
    shared.observe(keys::VIDEO_DEFICIT, 0.25);

    assert_eq!(metrics.counter(keys::VIDEO_FRAMES_LATE), 1);
    assert_eq!(metrics.observation(keys::VIDEO_DEFICIT).unwrap().last, 0.25);
}

#[test]
fn test_rate_measured_over_window() {
    let metrics = PipelineMetrics::with_rate_window(Duration::from_millis(20));
    assert!(metrics.rate(keys::VIDEO_FRAMES_DELIVERED).is_none());
    for _ in 0..5 {
        metrics.increment(keys::VIDEO_FRAMES_DELIVERED);
        thread::sleep(Duration::from_millis(10));
    }
    let rate = metrics.rate(keys::VIDEO_FRAMES_DELIVERED).unwrap();
    assert!(rate > 0.0);
}

#[test]
fn test_snapshot_serializes() {
    let metrics = PipelineMetrics::new();
    metrics.increment(keys::VIDEO_FRAMES_DECODED);
    metrics.observe(keys::VIDEO_DEFICIT, -0.1);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.counters.get(keys::VIDEO_FRAMES_DECODED), Some(&1));
    let json = serde_json::to_string(&snapshot).unwrap();
    let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back.counters, snapshot.counters);
    assert_eq!(back.observations, snapshot.observations);

    metrics.reset();
    assert!(metrics.snapshot().counters.is_empty());
}
