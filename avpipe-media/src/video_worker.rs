//! Video worker: decode, adaptive drop/skip, filter and deliver
//!
//! Two independent axes of state drive each iteration:
//!
//! - **Decode cost**: `Normal` or `DropNonReference`, chosen from a counter
//!   of consecutive frames that were behind the clock.
//! - **Recovery**: not seeking, seek pending (a sync window is open until a
//!   frame reaches the target), or waiting for a key frame after a flush,
//!   a decoder swap or an abandoned GOP.
//!
//! Iteration order: deferred tasks, seek intake, pause gate, unit intake,
//! discontinuity handling, timestamp reliability, degradation, decode, seek
//! completion, pacing, delivery.

use crate::capture::CaptureHandler;
use crate::codecs::{DecodeMode, Equalizer, FrameConverter, VideoDecoder};
use crate::error::{MediaError, MediaResult};
use crate::events::{EventBus, PlaybackEvent, StreamKind};
use crate::filter::{Filter, FilterChain, FilterContext};
use crate::frame::VideoFrame;
use crate::output::{OutputFanout, VideoSink};
use crate::worker::{RunState, WorkerHandle, WorkerLoop};
use avpipe_core::metrics::keys;
use avpipe_core::{ClockDriveMode, MasterClock, Packet, PacketQueue, SharedMetrics};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const TIMESTAMP_HISTORY: usize = 16;

/// Decoded frame waiting for its presentation time
#[derive(Debug)]
struct HeldFrame {
    frame: VideoFrame,
    due: Instant,
    clock: f64,
}

/// Tunables of the video worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoWorkerConfig {
    /// Consecutive units without a timestamp before forcing a frame rate
    pub missing_pts_threshold: u32,
    /// Slow-frame count that switches the decoder to `DropNonReference`
    pub slow_frames_degrade: u32,
    /// Slow-frame count from which a lagging GOP is abandoned
    pub slow_frames_abandon: u32,
    /// Lag (seconds) required, with enough slow frames, to abandon a GOP
    pub abandon_lag_secs: f64,
    /// Lag (seconds) that abandons a GOP regardless of counters
    pub hard_abandon_lag_secs: f64,
    /// How late (seconds) a frame may be and still be shown
    pub late_frame_tolerance_secs: f64,
    /// Frame rate used when the stream carries no timestamps
    pub forced_fps: f64,
    /// Poll interval for the queue, pause and stop, milliseconds
    pub poll_interval_ms: u64,
    /// Delay after a seek request for stale units to drain, milliseconds
    pub seek_settle_ms: u64,
    /// Upper bound of a single pacing wait, seconds
    pub max_pacing_wait_secs: f64,
    /// Longest a sink may hold the worker per frame, milliseconds
    pub sink_pause_timeout_ms: u64,
    /// Prefix of capture names
    pub capture_prefix: String,
}

impl Default for VideoWorkerConfig {
    fn default() -> Self {
        Self {
            missing_pts_threshold: 5,
            slow_frames_degrade: 10,
            slow_frames_abandon: 20,
            abandon_lag_secs: 1.0,
            hard_abandon_lag_secs: 2.0,
            late_frame_tolerance_secs: 0.05,
            forced_fps: 25.0,
            poll_interval_ms: 20,
            seek_settle_ms: 10,
            max_pacing_wait_secs: 2.0,
            sink_pause_timeout_ms: 20,
            capture_prefix: "capture".to_string(),
        }
    }
}

impl VideoWorkerConfig {
    /// Check thresholds for consistency
    pub fn validate(&self) -> MediaResult<()> {
        let invalid = |message: &str| {
            Err(MediaError::InvalidConfiguration {
                message: message.to_string(),
            })
        };
        if self.missing_pts_threshold == 0 {
            return invalid("missing_pts_threshold must be positive");
        }
        if self.slow_frames_degrade == 0 || self.slow_frames_degrade > self.slow_frames_abandon {
            return invalid("slow_frames_degrade must be in 1..=slow_frames_abandon");
        }
        if !(self.abandon_lag_secs > 0.0 && self.abandon_lag_secs <= self.hard_abandon_lag_secs) {
            return invalid("abandon_lag_secs must be in (0, hard_abandon_lag_secs]");
        }
        if !(self.late_frame_tolerance_secs >= 0.0) {
            return invalid("late_frame_tolerance_secs must not be negative");
        }
        if !(self.forced_fps > 0.0 && self.forced_fps.is_finite()) {
            return invalid("forced_fps must be a positive number");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be positive");
        }
        if !(self.max_pacing_wait_secs > 0.0 && self.max_pacing_wait_secs.is_finite()) {
            return invalid("max_pacing_wait_secs must be a positive number");
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn seek_settle(&self) -> Duration {
        Duration::from_millis(self.seek_settle_ms)
    }

    fn sink_pause_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_pause_timeout_ms)
    }
}

/// Command executed by the video worker at its next safe point
#[derive(Debug)]
pub enum VideoTask {
    /// Hand the last displayed frame to the capture handler
    Capture,
    /// Replace the capture handler
    SetCaptureHandler(Box<dyn CaptureHandler>),
    /// Picture adjustments for the converter, each in `-100..=100`
    SetEqualizer {
        /// Brightness offset
        brightness: i32,
        /// Contrast offset
        contrast: i32,
        /// Saturation offset
        saturation: i32,
    },
    /// Force a frame rate, or `None` to pace by timestamps again
    SetFrameRate(Option<f64>),
    /// Hot-swap the decoder
    SwapDecoder(Box<dyn VideoDecoder>),
    /// Replace the pixel converter
    SetConverter(Box<dyn FrameConverter>),
    /// Append a filter
    AddFilter(Box<dyn Filter<VideoFrame>>),
    /// Toggle filters by name
    SetFilterEnabled {
        /// Filter name
        name: String,
        /// New state
        enabled: bool,
    },
    /// Deliver a blank frame so every sink clears its picture
    ClearOutputs,
}

/// Handle to a running video worker
pub type VideoWorkerHandle = WorkerHandle<VideoTask>;

impl WorkerHandle<VideoTask> {
    /// Capture the last displayed frame at the next safe point
    pub fn request_capture(&self) {
        self.schedule(VideoTask::Capture);
    }
}

/// Video delivery loop
#[derive(Debug)]
pub struct VideoWorker {
    base: WorkerLoop<VideoTask>,
    config: VideoWorkerConfig,
    outputs: Arc<OutputFanout<dyn VideoSink>>,
    decoder: Option<Box<dyn VideoDecoder>>,
    converter: Option<Box<dyn FrameConverter>>,
    equalizer: Equalizer,
    capture: Option<Box<dyn CaptureHandler>>,
    captures: u64,
    filters: FilterChain<VideoFrame>,

    pending: Option<Packet>,
    held: Option<HeldFrame>,
    wait_key_frame: bool,
    seek_target: Option<f64>,
    sync_id: u32,
    eos_reached: bool,

    decode_mode: DecodeMode,
    slow_frames: u32,
    skip_toggle: bool,

    missing_pts: u32,
    forced_interval: Option<f64>,
    forced_from: Option<ClockDriveMode>,
    forced_origin: f64,
    user_fps: Option<f64>,
    recent_timestamps: VecDeque<f64>,
    last_delivery: Option<Instant>,
    last_displayed: Option<VideoFrame>,
}

impl VideoWorker {
    /// Create a worker reading `queue` and delivering to `outputs`
    pub fn new(
        config: VideoWorkerConfig,
        queue: Arc<PacketQueue>,
        clock: Arc<MasterClock>,
        events: EventBus,
        metrics: SharedMetrics,
        outputs: Arc<OutputFanout<dyn VideoSink>>,
    ) -> Self {
        let base = WorkerLoop::new(
            StreamKind::Video,
            queue,
            clock,
            events,
            metrics,
            config.poll_interval(),
        );
        Self {
            base,
            config,
            outputs,
            decoder: None,
            converter: None,
            equalizer: Equalizer::default(),
            capture: None,
            captures: 0,
            filters: FilterChain::new(),
            pending: None,
            held: None,
            wait_key_frame: false,
            seek_target: None,
            sync_id: 0,
            eos_reached: false,
            decode_mode: DecodeMode::Normal,
            slow_frames: 0,
            skip_toggle: false,
            missing_pts: 0,
            forced_interval: None,
            forced_from: None,
            forced_origin: 0.0,
            user_fps: None,
            recent_timestamps: VecDeque::with_capacity(TIMESTAMP_HISTORY),
            last_delivery: None,
            last_displayed: None,
        }
    }

    /// Set the decoder used from the first iteration
    pub fn with_decoder(mut self, decoder: Box<dyn VideoDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Set the pixel converter
    pub fn with_converter(mut self, converter: Box<dyn FrameConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Set the capture handler
    pub fn with_capture_handler(mut self, handler: Box<dyn CaptureHandler>) -> Self {
        self.capture = Some(handler);
        self
    }

    /// Append a filter
    pub fn with_filter(mut self, filter: Box<dyn Filter<VideoFrame>>) -> Self {
        self.filters.add(filter);
        self
    }

    /// Handle for other threads
    pub fn handle(&self) -> VideoWorkerHandle {
        self.base.handle()
    }

    /// Run until stopped.
    ///
    /// Returns immediately with an error when no usable decoder or no
    /// output is configured.
    pub fn run(mut self) -> MediaResult<()> {
        if !self.decoder.as_ref().is_some_and(|d| d.is_available()) {
            warn!("video worker has no usable decoder");
            self.base.control.set_run_state(RunState::Stopped);
            return Err(MediaError::NoDecoder {
                stream: StreamKind::Video.to_string(),
            });
        }
        if self.outputs.is_empty() {
            warn!("video worker has no output");
            self.base.control.set_run_state(RunState::Stopped);
            return Err(MediaError::NoOutput {
                stream: StreamKind::Video.to_string(),
            });
        }

        self.base.begin();
        while !self.base.is_stopped() {
            self.iterate();
        }
        self.shutdown();
        Ok(())
    }

    fn iterate(&mut self) {
        self.run_tasks();
        if self.base.is_stopped() {
            return;
        }

        if self.base.control.take_seek_request() {
            if self.pending.take().is_some() || self.held.take().is_some() {
                debug!("in-flight work dropped for seek");
            }
            self.base.wait(self.config.seek_settle());
            return;
        }
        if self.seek_target.is_none() && self.base.pause_gate() {
            // pacing restarts from the first frame after resume
            self.last_delivery = None;
            return;
        }
        if let Some(held) = self.held.take() {
            self.present(held);
            return;
        }

        let packet = match self.pending.take() {
            Some(packet) => packet,
            None => match self.base.next_packet() {
                Some(packet) => packet,
                None => return,
            },
        };

        if !packet.is_valid() {
            self.handle_discontinuity(&packet);
            return;
        }
        if self.eos_reached {
            self.discard(&packet, "after end of stream");
            return;
        }

        if !packet.is_end_of_stream() {
            if self.wait_key_frame {
                if !packet.is_key_frame {
                    self.discard(&packet, "waiting for key frame");
                    return;
                }
                debug!(pts = packet.pts, "key frame reached, decoding resumes");
                self.wait_key_frame = false;
            }
            self.check_timestamps(&packet);
            self.update_decode_mode();
            if self.abandon_gop(&packet) {
                return;
            }
        }

        let Some(frame) = self.decode(packet) else {
            return;
        };
        let Some(frame) = self.complete_seek(frame) else {
            return;
        };
        if self.admit(&frame) {
            let held = HeldFrame {
                due: self.due_instant(&frame),
                clock: self.base.clock.value(),
                frame,
            };
            self.present(held);
        }
    }

    fn run_tasks(&mut self) {
        for task in self.base.take_tasks() {
            self.execute(task);
        }
    }

    fn execute(&mut self, task: VideoTask) {
        match task {
            VideoTask::Capture => self.capture_frame(),
            VideoTask::SetCaptureHandler(handler) => self.capture = Some(handler),
            VideoTask::SetEqualizer {
                brightness,
                contrast,
                saturation,
            } => {
                self.equalizer = Equalizer::new(brightness, contrast, saturation);
                match self.converter.as_mut() {
                    Some(converter) => converter.set_equalizer(self.equalizer),
                    None => debug!("equalizer stored until a converter is set"),
                }
            }
            VideoTask::SetFrameRate(fps) => {
                self.user_fps = fps.filter(|fps| *fps > 0.0 && fps.is_finite());
                match self.user_fps {
                    Some(fps) => self.force_frame_rate(fps),
                    None => self.release_frame_rate(),
                }
            }
            VideoTask::SwapDecoder(mut decoder) => {
                if !decoder.is_available() {
                    warn!(decoder = decoder.name(), "replacement decoder unavailable, keeping current");
                    return;
                }
                decoder.set_decode_mode(self.decode_mode);
                info!(decoder = decoder.name(), "video decoder swapped");
                self.decoder = Some(decoder);
                self.pending = None;
                self.wait_key_frame = true;
            }
            VideoTask::SetConverter(mut converter) => {
                converter.set_equalizer(self.equalizer);
                self.converter = Some(converter);
            }
            VideoTask::AddFilter(filter) => self.filters.add(filter),
            VideoTask::SetFilterEnabled { name, enabled } => {
                if !self.filters.set_enabled(&name, enabled) {
                    debug!(%name, "no filter to toggle");
                }
            }
            VideoTask::ClearOutputs => {
                self.outputs.deliver(&VideoFrame::blank());
                self.last_displayed = None;
            }
        }
    }

    fn capture_frame(&mut self) {
        let Some(frame) = self.last_displayed.as_ref() else {
            debug!("nothing displayed yet, capture skipped");
            return;
        };
        let Some(handler) = self.capture.as_mut() else {
            warn!("capture requested without a capture handler");
            return;
        };
        self.captures += 1;
        let name = format!("{}-{}", self.config.capture_prefix, self.captures);
        match handler.capture(&name, frame) {
            Ok(()) => {
                info!(%name, timestamp = frame.timestamp, "frame captured");
                self.base.events.publish(PlaybackEvent::FrameCaptured {
                    name,
                    timestamp: frame.timestamp,
                });
            }
            Err(err) => warn!(error = %err, %name, "frame capture failed"),
        }
    }

    fn handle_discontinuity(&mut self, packet: &Packet) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.eos_reached = false;
        self.wait_key_frame = true;
        self.slow_frames = 0;
        self.skip_toggle = false;
        self.recent_timestamps.clear();
        self.last_delivery = None;
        self.update_decode_mode();

        if packet.sync_id != 0 {
            let clock = &self.base.clock;
            if clock.open_sync_window(packet.sync_id) || clock.active_sync_id() == packet.sync_id {
                self.sync_id = packet.sync_id;
            }
        }
        self.seek_target = if packet.is_seek() || self.sync_id != 0 {
            Some(packet.pts.max(0.0))
        } else {
            None
        };
        self.forced_origin = packet.pts.max(0.0);
        debug!(
            sync_id = packet.sync_id,
            target = ?self.seek_target,
            "discontinuity: decoder flushed, waiting for key frame"
        );
    }

    fn check_timestamps(&mut self, packet: &Packet) {
        if packet.has_pts() {
            self.missing_pts = 0;
            return;
        }
        self.missing_pts = self.missing_pts.saturating_add(1);
        if self.missing_pts > self.config.missing_pts_threshold && self.forced_interval.is_none() {
            let fps = self.user_fps.unwrap_or(self.config.forced_fps);
            warn!(
                missing = self.missing_pts,
                fps, "stream carries no usable timestamps, forcing frame rate"
            );
            self.force_frame_rate(fps);
        }
    }

    fn force_frame_rate(&mut self, fps: f64) {
        self.forced_interval = Some(1.0 / fps);
        let clock = &self.base.clock;
        let old = clock.set_drive_mode(ClockDriveMode::VideoDriven);
        if old != ClockDriveMode::VideoDriven {
            self.forced_from.get_or_insert(old);
            self.base.events.publish(PlaybackEvent::ClockModeChanged {
                mode: ClockDriveMode::VideoDriven,
            });
        }
        debug!(fps, "forced frame rate");
    }

    fn release_frame_rate(&mut self) {
        self.forced_interval = None;
        self.missing_pts = 0;
        if let Some(mode) = self.forced_from.take() {
            self.base.clock.set_drive_mode(mode);
            self.base
                .events
                .publish(PlaybackEvent::ClockModeChanged { mode });
        }
        debug!("pacing by timestamps");
    }

    fn update_decode_mode(&mut self) {
        let wanted = if self.slow_frames >= self.config.slow_frames_degrade {
            DecodeMode::DropNonReference
        } else {
            DecodeMode::Normal
        };
        if wanted == self.decode_mode {
            return;
        }
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.set_decode_mode(wanted);
        }
        self.decode_mode = wanted;
        debug!(mode = ?wanted, slow_frames = self.slow_frames, "decode mode changed");
        self.base
            .events
            .publish(PlaybackEvent::DecodeModeChanged { mode: wanted });
    }

    /// Drop the rest of a GOP that can no longer be shown in time
    fn abandon_gop(&mut self, packet: &Packet) -> bool {
        if packet.is_key_frame || !packet.has_pts() || self.forced_interval.is_some() {
            return false;
        }
        let clock = &self.base.clock;
        if clock.is_sync_window_open() || !clock.has_value() || clock.video_drives() {
            return false;
        }
        let lag = clock.value() - packet.pts;
        let sustained = self.slow_frames >= self.config.slow_frames_abandon
            && lag > self.config.abandon_lag_secs;
        let hard = lag > self.config.hard_abandon_lag_secs;
        if !(sustained || hard) {
            return false;
        }

        warn!(lag, slow_frames = self.slow_frames, hard, "abandoning GOP");
        self.wait_key_frame = true;
        self.slow_frames = 0;
        self.base.stats.units_discarded += 1;
        self.base.metrics.increment(keys::VIDEO_GOPS_ABANDONED);
        self.base.events.publish(PlaybackEvent::GopAbandoned { lag });
        true
    }

    fn decode(&mut self, mut packet: Packet) -> Option<VideoFrame> {
        let is_eos = packet.is_end_of_stream();
        let pts = packet.pts;
        let is_key = packet.is_key_frame;
        let decoder = self.decoder.as_mut()?;

        let frame = match decoder.decode(&packet) {
            Ok(consumed) => {
                let frame = decoder.frame();
                if is_eos {
                    if frame.is_some() {
                        self.pending = Some(packet);
                    }
                } else {
                    packet.advance(consumed);
                    if consumed > 0 && !packet.is_consumed() {
                        self.pending = Some(packet);
                    }
                }
                frame
            }
            Err(err) => {
                warn!(error = %err, pts, "video decode failed");
                self.base.stats.decode_errors += 1;
                self.base.metrics.increment(keys::VIDEO_DECODE_ERRORS);
                if let Some(&last) = self.recent_timestamps.back() {
                    self.push_timestamp(last);
                }
                None
            }
        };

        let Some(mut frame) = frame else {
            if is_eos {
                self.end_of_stream();
            }
            return None;
        };

        self.base.stats.frames_decoded += 1;
        self.base.metrics.increment(keys::VIDEO_FRAMES_DECODED);
        if let Some(interval) = self.forced_interval {
            frame.timestamp = self
                .recent_timestamps
                .back()
                .map_or(self.forced_origin, |last| last + interval);
        } else if frame.timestamp <= 0.0 {
            if pts > 0.0 {
                frame.timestamp = pts;
            } else if let Some(&last) = self.recent_timestamps.back() {
                frame.timestamp = last + self.average_interval();
            }
        }
        frame.is_key_frame |= is_key;
        if frame.timestamp >= 0.0 {
            self.push_timestamp(frame.timestamp);
        }
        trace!(timestamp = frame.timestamp, "video frame decoded");
        Some(frame)
    }

    fn push_timestamp(&mut self, timestamp: f64) {
        if self.recent_timestamps.len() == TIMESTAMP_HISTORY {
            self.recent_timestamps.pop_front();
        }
        self.recent_timestamps.push_back(timestamp);
    }

    fn average_interval(&self) -> f64 {
        let (Some(first), Some(last)) = (self.recent_timestamps.front(), self.recent_timestamps.back())
        else {
            return 1.0 / self.config.forced_fps;
        };
        let steps = self.recent_timestamps.len().saturating_sub(1);
        if steps == 0 || last <= first {
            return 1.0 / self.config.forced_fps;
        }
        (last - first) / steps as f64
    }

    fn last_timestamp(&self) -> f64 {
        self.recent_timestamps
            .back()
            .copied()
            .unwrap_or(self.base.stats.last_timestamp)
    }

    fn end_of_stream(&mut self) {
        if self.eos_reached {
            return;
        }
        self.eos_reached = true;
        self.pending = None;
        info!(last = self.last_timestamp(), "video end of stream decoded");
        self.base.events.publish(PlaybackEvent::EndOfStreamDecoded {
            stream: StreamKind::Video,
        });
        if self.seek_target.take().is_some() {
            let timestamp = self.last_timestamp();
            self.close_sync_window();
            self.base.events.publish(PlaybackEvent::SeekFinished {
                stream: StreamKind::Video,
                timestamp,
            });
        }
    }

    fn close_sync_window(&mut self) {
        if self.sync_id != 0 {
            self.base.clock.close_sync_window(self.sync_id);
            self.sync_id = 0;
        }
    }

    /// Discard frames short of the seek target; the frame that reaches it
    /// closes the sync window and is not shown either.
    fn complete_seek(&mut self, frame: VideoFrame) -> Option<VideoFrame> {
        let Some(target) = self.seek_target else {
            return Some(frame);
        };
        self.base.stats.frames_dropped += 1;
        if frame.timestamp < target {
            trace!(timestamp = frame.timestamp, target, "frame before seek target discarded");
            return None;
        }

        self.seek_target = None;
        self.close_sync_window();
        let clock = &self.base.clock;
        if clock.drive_mode() == ClockDriveMode::External {
            clock.set_external_time(frame.timestamp);
        } else {
            clock.set_initial_value(frame.timestamp);
            clock.update_video_time(frame.timestamp);
        }
        info!(target, timestamp = frame.timestamp, "seek finished");
        self.base.events.publish(PlaybackEvent::SeekFinished {
            stream: StreamKind::Video,
            timestamp: frame.timestamp,
        });
        None
    }

    /// Late-frame and catch-up decisions, taken once per decoded frame.
    ///
    /// Only a clock driven by another source can make a frame late: when
    /// the video drives, the clock is the last frame shown.
    fn admit(&mut self, frame: &VideoFrame) -> bool {
        let clock = &self.base.clock;
        if self.forced_interval.is_some() || !clock.has_value() || clock.video_drives() {
            return true;
        }

        let deficit = (frame.timestamp - clock.value()) / clock.speed();
        self.base.metrics.observe(keys::VIDEO_DEFICIT, deficit);
        if deficit < -self.config.late_frame_tolerance_secs {
            self.slow_frames = self.slow_frames.saturating_add(1);
            self.base.stats.frames_dropped += 1;
            self.base.metrics.increment(keys::VIDEO_FRAMES_LATE);
            trace!(deficit, slow_frames = self.slow_frames, "late frame not shown");
            return false;
        }
        self.slow_frames = self.slow_frames.saturating_sub(1);

        if self.slow_frames > self.config.slow_frames_abandon && !frame.is_key_frame {
            self.skip_toggle = !self.skip_toggle;
            if self.skip_toggle {
                self.base.stats.frames_dropped += 1;
                self.base.metrics.increment(keys::VIDEO_FRAMES_SKIPPED);
                trace!(timestamp = frame.timestamp, "frame skipped to catch up");
                return false;
            }
        }
        true
    }

    /// Wall-clock instant at which `frame` is due
    fn due_instant(&self, frame: &VideoFrame) -> Instant {
        let now = Instant::now();
        let clock = &self.base.clock;
        let speed = clock.speed();
        let max_wait = self.config.max_pacing_wait_secs;
        // interval to the previous frame, capped against timestamp jumps
        let after_last = |interval: f64| match self.last_delivery {
            Some(at) => {
                at + Duration::try_from_secs_f64((interval / speed).clamp(0.0, max_wait))
                    .unwrap_or_default()
            }
            None => now,
        };

        if let Some(interval) = self.forced_interval {
            return after_last(interval);
        }
        if !clock.has_value() {
            return now;
        }
        let ahead = frame.timestamp - clock.value();
        if clock.video_drives() {
            return after_last(ahead);
        }
        if !(ahead > 0.0) {
            return now;
        }
        Duration::try_from_secs_f64(ahead / speed)
            .ok()
            .and_then(|wait| now.checked_add(wait))
            .unwrap_or(now)
    }

    /// Wait for `held` and deliver it.
    ///
    /// A wait cut short by a task, pause or seek request keeps the frame
    /// for the next iteration; a stop delivers it.
    fn present(&mut self, mut held: HeldFrame) {
        let clock = self.base.clock.value();
        if clock != held.clock {
            held.due = self.due_instant(&held.frame);
            held.clock = clock;
        }

        let now = Instant::now();
        if held.due > now {
            let max_wait = Duration::from_secs_f64(self.config.max_pacing_wait_secs);
            self.base.wait((held.due - now).min(max_wait));
            if !self.base.is_stopped() && Instant::now() < held.due {
                trace!(timestamp = held.frame.timestamp, "frame held until due");
                self.held = Some(held);
                return;
            }
        }
        self.deliver(held.frame);
    }

    fn deliver(&mut self, mut frame: VideoFrame) {
        let clock = self.base.clock.clone();
        let mut ctx = FilterContext::new(
            StreamKind::Video,
            clock.value(),
            clock.speed(),
            self.base.stats.frames_delivered,
        );
        self.filters.run(&mut ctx, &self.base.stats, &mut frame);

        let Some(frame) = self.convert(frame) else {
            return;
        };
        if self.outputs.can_pause() {
            self.outputs.request_pause(self.config.sink_pause_timeout());
        }
        let sinks = self.outputs.deliver(&frame);

        clock.set_initial_value(frame.timestamp);
        clock.update_video_time(frame.timestamp);
        self.last_delivery = Some(Instant::now());
        self.base.stats.frames_delivered += 1;
        self.base.stats.last_timestamp = frame.timestamp;
        self.base.metrics.increment(keys::VIDEO_FRAMES_DELIVERED);
        trace!(timestamp = frame.timestamp, sinks, "video frame shown");
        self.base.events.publish(PlaybackEvent::FrameDelivered {
            stream: StreamKind::Video,
            timestamp: frame.timestamp,
        });
        self.last_displayed = Some(frame);
    }

    fn convert(&mut self, frame: VideoFrame) -> Option<VideoFrame> {
        let Some(target) = self.outputs.negotiate_format(frame.pixel_format) else {
            return Some(frame);
        };
        let Some(converter) = self.converter.as_mut() else {
            warn!(format = ?frame.pixel_format, ?target, "no converter for unsupported format, frame dropped");
            self.base.stats.frames_dropped += 1;
            return None;
        };
        match converter.convert(&frame, target) {
            Ok(converted) => Some(converted),
            Err(err) => {
                warn!(error = %err, "pixel conversion failed, frame dropped");
                self.base.stats.frames_dropped += 1;
                None
            }
        }
    }

    fn discard(&mut self, packet: &Packet, reason: &'static str) {
        self.base.stats.units_discarded += 1;
        self.base.metrics.increment(keys::VIDEO_UNITS_DISCARDED);
        trace!(pts = packet.pts, key = packet.is_key_frame, reason, "unit discarded");
    }

    fn shutdown(&mut self) {
        if self.sync_id != 0 {
            debug!(sync_id = self.sync_id, "closing sync window on exit");
            self.close_sync_window();
        }
        self.seek_target = None;
        self.pending = None;
        self.held = None;
        self.base.finish();
    }
}
