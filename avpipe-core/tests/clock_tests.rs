//! Integration tests for the master clock
//!
//! Covers drive-mode arbitration, segment resets and the sync window
//! open/close protocol used by seek recovery.

use avpipe_core::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// DRIVE MODE TESTS
// ============================================================================

#[test]
fn test_drive_mode_serialization() {
    let mode = ClockDriveMode::VideoDriven;
    let serialized = serde_json::to_string(&mode).unwrap();
    let deserialized: ClockDriveMode = serde_json::from_str(&serialized).unwrap();
    assert_eq!(mode, deserialized);
    assert_eq!(ClockDriveMode::default(), ClockDriveMode::Auto);
}

#[test]
fn test_audio_driven_ignores_video_updates() {
    let clock = MasterClock::with_mode(ClockDriveMode::AudioDriven);
    clock.update_video_time(4.0);
    assert!(!clock.has_value());
    clock.update_value(1.25);
    assert!(clock.has_value());
    assert_eq!(clock.value(), 1.25);
    assert_eq!(clock.video_time(), 4.0);
}

#[test]
fn test_video_driven_ignores_audio_updates() {
    let clock = MasterClock::with_mode(ClockDriveMode::VideoDriven);
    clock.update_value(9.0);
    assert!(!clock.has_value());
    clock.update_video_time(0.5);
    assert_eq!(clock.value(), 0.5);
}

#[test]
fn test_value_is_monotonic_within_segment() {
    let clock = MasterClock::with_mode(ClockDriveMode::AudioDriven);
    clock.update_value(2.0);
    clock.update_value(1.0);
    assert_eq!(clock.value(), 2.0);
    clock.update_value(-1.0);
    assert_eq!(clock.value(), 2.0);

    clock.reset_segment();
    clock.update_value(1.0);
    assert_eq!(clock.value(), 1.0);
}

#[test]
fn test_switching_mode_keeps_value() {
    let clock = MasterClock::with_mode(ClockDriveMode::AudioDriven);
    clock.update_value(3.0);
    let old = clock.set_drive_mode(ClockDriveMode::VideoDriven);
    assert_eq!(old, ClockDriveMode::AudioDriven);
    assert_eq!(clock.value(), 3.0);
    clock.update_video_time(3.5);
    assert_eq!(clock.value(), 3.5);
}

#[test]
fn test_external_clock_runs_and_pauses() {
    let clock = MasterClock::with_mode(ClockDriveMode::External);
    assert!(clock.set_initial_value(10.0));
    thread::sleep(Duration::from_millis(30));
    let running = clock.value();
    assert!(running > 10.0);

    clock.pause(true);
    let frozen = clock.value();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(clock.value(), frozen);

    clock.pause(false);
    thread::sleep(Duration::from_millis(20));
    assert!(clock.value() > frozen);
}

#[test]
fn test_speed_rejects_invalid_values() {
    let clock = MasterClock::new();
    clock.set_speed(2.0);
    assert_eq!(clock.speed(), 2.0);
    clock.set_speed(0.0);
    clock.set_speed(f64::NAN);
    assert_eq!(clock.speed(), 2.0);
}

// ============================================================================
// SYNC WINDOW TESTS
// ============================================================================

#[test]
fn test_sync_window_round_trip() {
    let clock = MasterClock::new();
    assert!(!clock.is_sync_window_open());
    assert!(clock.open_sync_window(7));
    assert_eq!(clock.active_sync_id(), 7);
    assert!(!clock.open_sync_window(7));

    assert!(clock.close_sync_window(7));
    assert!(!clock.close_sync_window(7));
    assert!(!clock.is_sync_window_open());

    let stats = clock.sync_window_stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.closed, 1);
    assert_eq!(stats.outstanding(), 0);
}

#[test]
fn test_sync_window_rejects_zero_and_foreign_ids() {
    let clock = MasterClock::new();
    assert!(!clock.open_sync_window(0));
    assert!(clock.open_sync_window(3));
    assert!(!clock.close_sync_window(4));
    assert!(!clock.close_sync_window(0));
    assert_eq!(clock.active_sync_id(), 3);
}

#[test]
fn test_superseded_window_counts_as_closed() {
    let clock = MasterClock::new();
    assert!(clock.open_sync_window(1));
    assert!(clock.open_sync_window(2));
    assert!(!clock.close_sync_window(1));
    assert!(clock.close_sync_window(2));
    let stats = clock.sync_window_stats();
    assert_eq!(stats.opened, 2);
    assert_eq!(stats.closed, 2);
}

#[test]
fn test_opening_window_starts_new_segment() {
    let clock = MasterClock::with_mode(ClockDriveMode::AudioDriven);
    clock.set_initial_value(1.0);
    clock.update_value(20.0);
    assert!(clock.open_sync_window(5));
    assert!(!clock.has_value());
    assert!(clock.initial_value().is_none());

    clock.update_value(4.0);
    assert_eq!(clock.value(), 4.0);
}

#[test]
fn test_concurrent_readers_never_block_writer() {
    let clock = Arc::new(MasterClock::with_mode(ClockDriveMode::AudioDriven));
    let writer = {
        let clock = clock.clone();
        thread::spawn(move || {
            for i in 0..1000 {
                clock.update_value(i as f64 * 0.001);
            }
        })
    };
    let reader = {
        let clock = clock.clone();
        thread::spawn(move || {
            let mut last = 0.0;
            for _ in 0..1000 {
                let value = clock.value();
                assert!(value >= last);
                last = value;
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
    assert!((clock.value() - 0.999).abs() < 1e-9);
}
