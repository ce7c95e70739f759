//! Shared master clock
//!
//! The clock is the single notion of "now" shared by the audio and video
//! workers. Exactly one source drives it at a time:
//!
//! - **AudioDriven**: the audio worker reports the pts of what it plays
//! - **VideoDriven**: the video worker reports the pts of what it shows
//! - **External**: free running wall clock anchored at the first timestamp
//! - **Auto**: audio drives while audio frames arrive, video otherwise
//!
//! A *sync window* brackets a seek-recovery period. While one is open the
//! value is not authoritative for drop decisions of the non-driving stream.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Which stream advances the master clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockDriveMode {
    /// Audio worker reports playback position
    AudioDriven,
    /// Video worker reports displayed position
    VideoDriven,
    /// Free running wall clock
    External,
    /// Audio when present, video otherwise
    #[default]
    Auto,
}

/// Counters for sync window bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncWindowStats {
    /// Windows opened since creation
    pub opened: u64,
    /// Windows closed since creation, including superseded ones
    pub closed: u64,
}

impl SyncWindowStats {
    /// Number of windows currently open (0 or 1)
    pub fn outstanding(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

#[derive(Debug)]
struct ClockState {
    value: f64,
    has_value: bool,
    initial_value: Option<f64>,
    video_time: f64,
    mode: ClockDriveMode,
    audio_seen: bool,
    active_sync_id: u32,
    sync_stats: SyncWindowStats,
    speed: f64,
    paused: bool,
    anchor: Option<Instant>,
}

impl ClockState {
    fn current(&self) -> f64 {
        match (self.mode, self.anchor) {
            (ClockDriveMode::External, Some(anchor)) if !self.paused => {
                self.value + anchor.elapsed().as_secs_f64() * self.speed
            }
            _ => self.value,
        }
    }

    /// Fold elapsed wall time into `value` and re-anchor
    fn rebase(&mut self) {
        if self.mode == ClockDriveMode::External && self.anchor.is_some() {
            self.value = self.current();
            self.anchor = if self.paused { None } else { Some(Instant::now()) };
        }
    }

    fn drive(&mut self, t: f64) {
        if self.has_value && t < self.value {
            trace!(value = self.value, rejected = t, "non-monotonic clock update ignored");
            return;
        }
        self.value = t;
        self.has_value = true;
    }
}

/// Master clock shared between workers
#[derive(Debug)]
pub struct MasterClock {
    state: Mutex<ClockState>,
}

impl MasterClock {
    /// Create a clock in [`ClockDriveMode::Auto`]
    pub fn new() -> Self {
        Self::with_mode(ClockDriveMode::Auto)
    }

    /// Create a clock with an explicit drive mode
    pub fn with_mode(mode: ClockDriveMode) -> Self {
        Self {
            state: Mutex::new(ClockState {
                value: 0.0,
                has_value: false,
                initial_value: None,
                video_time: 0.0,
                mode,
                audio_seen: false,
                active_sync_id: 0,
                sync_stats: SyncWindowStats::default(),
                speed: 1.0,
                paused: false,
                anchor: None,
            }),
        }
    }

    /// Set the time origin of the current segment.
    ///
    /// Ignored when an origin is already set; returns whether it was applied.
    pub fn set_initial_value(&self, t: f64) -> bool {
        let mut state = self.state.lock();
        if state.initial_value.is_some() || t < 0.0 {
            return false;
        }
        state.initial_value = Some(t);
        if state.mode == ClockDriveMode::External && !state.has_value {
            state.value = t;
            state.has_value = true;
            state.anchor = if state.paused { None } else { Some(Instant::now()) };
        }
        debug!(initial = t, "clock origin set");
        true
    }

    /// Time origin of the current segment
    pub fn initial_value(&self) -> Option<f64> {
        self.state.lock().initial_value
    }

    /// Report the audio position. Applied when audio drives the clock.
    pub fn update_value(&self, t: f64) {
        if t < 0.0 {
            return;
        }
        let mut state = self.state.lock();
        match state.mode {
            ClockDriveMode::AudioDriven => state.drive(t),
            ClockDriveMode::Auto => {
                state.audio_seen = true;
                state.drive(t);
            }
            _ => {}
        }
    }

    /// Report the displayed video position. Applied when video drives.
    pub fn update_video_time(&self, t: f64) {
        if t < 0.0 {
            return;
        }
        let mut state = self.state.lock();
        state.video_time = t;
        match state.mode {
            ClockDriveMode::VideoDriven => state.drive(t),
            ClockDriveMode::Auto if !state.audio_seen => state.drive(t),
            _ => {}
        }
    }

    /// Re-anchor an external clock at `t` (e.g. after a seek)
    pub fn set_external_time(&self, t: f64) {
        let mut state = self.state.lock();
        state.value = t;
        state.has_value = true;
        if state.mode == ClockDriveMode::External {
            state.anchor = if state.paused { None } else { Some(Instant::now()) };
        }
    }

    /// Current clock value in seconds. Never blocks on a worker.
    pub fn value(&self) -> f64 {
        self.state.lock().current()
    }

    /// Whether any driving update arrived in the current segment
    pub fn has_value(&self) -> bool {
        self.state.lock().has_value
    }

    /// Value relative to the segment origin
    pub fn position(&self) -> f64 {
        let state = self.state.lock();
        state.current() - state.initial_value.unwrap_or(0.0)
    }

    /// Last position reported by the video worker
    pub fn video_time(&self) -> f64 {
        self.state.lock().video_time
    }

    /// Current drive mode
    pub fn drive_mode(&self) -> ClockDriveMode {
        self.state.lock().mode
    }

    /// Whether video reports currently advance the value
    pub fn video_drives(&self) -> bool {
        let state = self.state.lock();
        match state.mode {
            ClockDriveMode::VideoDriven => true,
            ClockDriveMode::Auto => !state.audio_seen,
            _ => false,
        }
    }

    /// Change the drive mode, returning the previous one
    pub fn set_drive_mode(&self, mode: ClockDriveMode) -> ClockDriveMode {
        let mut state = self.state.lock();
        let old = state.mode;
        if old == mode {
            return old;
        }
        state.value = state.current();
        state.mode = mode;
        state.anchor = if mode == ClockDriveMode::External && state.has_value && !state.paused {
            Some(Instant::now())
        } else {
            None
        };
        debug!(?old, new = ?mode, "clock drive mode changed");
        old
    }

    /// Open a seek-recovery window keyed by `sync_id`.
    ///
    /// Starts a new segment: the origin and monotonic guard are reset so the
    /// driving worker may report positions before the previous value.
    /// Returns false for id 0 or when the same window is already open. An
    /// open window with a different id is superseded and counted as closed.
    pub fn open_sync_window(&self, sync_id: u32) -> bool {
        if sync_id == 0 {
            return false;
        }
        let mut state = self.state.lock();
        if state.active_sync_id == sync_id {
            return false;
        }
        if state.active_sync_id != 0 {
            warn!(
                superseded = state.active_sync_id,
                sync_id, "sync window superseded before it was closed"
            );
            state.sync_stats.closed += 1;
        }
        state.active_sync_id = sync_id;
        state.sync_stats.opened += 1;
        state.has_value = false;
        state.initial_value = None;
        state.audio_seen = false;
        debug!(sync_id, "sync window opened");
        true
    }

    /// Close the window opened with `sync_id`.
    ///
    /// Returns false when that window is not the active one, so a second
    /// close of the same id is a no-op.
    pub fn close_sync_window(&self, sync_id: u32) -> bool {
        let mut state = self.state.lock();
        if sync_id == 0 || state.active_sync_id != sync_id {
            debug!(sync_id, active = state.active_sync_id, "close of inactive sync window ignored");
            return false;
        }
        state.active_sync_id = 0;
        state.sync_stats.closed += 1;
        debug!(sync_id, "sync window closed");
        true
    }

    /// Id of the open sync window, 0 when none
    pub fn active_sync_id(&self) -> u32 {
        self.state.lock().active_sync_id
    }

    /// Whether a seek-recovery window is open
    pub fn is_sync_window_open(&self) -> bool {
        self.state.lock().active_sync_id != 0
    }

    /// Open/close counters
    pub fn sync_window_stats(&self) -> SyncWindowStats {
        self.state.lock().sync_stats
    }

    /// Playback speed multiplier
    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    /// Change playback speed. Non-positive values are ignored.
    pub fn set_speed(&self, speed: f64) {
        if speed <= 0.0 || !speed.is_finite() {
            return;
        }
        let mut state = self.state.lock();
        state.rebase();
        state.speed = speed;
    }

    /// Freeze or resume an external clock
    pub fn pause(&self, paused: bool) {
        let mut state = self.state.lock();
        if state.paused == paused {
            return;
        }
        state.rebase();
        state.paused = paused;
        if state.mode == ClockDriveMode::External && state.has_value {
            state.anchor = if paused { None } else { Some(Instant::now()) };
        }
    }

    /// Whether the clock is paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Forget the origin and value of the current segment
    pub fn reset_segment(&self) {
        let mut state = self.state.lock();
        state.has_value = false;
        state.initial_value = None;
        state.anchor = None;
        state.audio_seen = false;
    }

    /// Reset to the freshly created state, keeping mode and speed
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.value = 0.0;
        state.video_time = 0.0;
        state.has_value = false;
        state.initial_value = None;
        state.anchor = None;
        state.audio_seen = false;
        state.paused = false;
    }
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_mode_prefers_audio() {
        let clock = MasterClock::new();
        clock.update_video_time(1.0);
        assert_eq!(clock.value(), 1.0);
        clock.update_value(0.5);
        assert_eq!(clock.value(), 1.0); // monotonic
        clock.update_value(1.5);
        clock.update_video_time(3.0);
        assert_eq!(clock.value(), 1.5);
        assert_eq!(clock.video_time(), 3.0);
        assert!(!clock.video_drives());
    }

    #[test]
    fn test_initial_value_set_once() {
        let clock = MasterClock::with_mode(ClockDriveMode::AudioDriven);
        assert!(clock.set_initial_value(2.0));
        assert!(!clock.set_initial_value(5.0));
        clock.update_value(3.0);
        assert_eq!(clock.position(), 1.0);
    }
}
