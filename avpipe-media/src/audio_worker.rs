//! Audio worker: decode, negotiate the sink, resample and play in chunks
//!
//! Decoding continues when the sink is missing or closed, so a clock driven
//! by audio keeps advancing. Resampler renegotiation is applied at the top
//! of the next iteration, never in the middle of a chunked frame.

use crate::codecs::{AudioDecoder, Resampler};
use crate::error::{MediaError, MediaResult};
use crate::events::{EventBus, PlaybackEvent, StreamKind};
use crate::filter::{Filter, FilterChain, FilterContext};
use crate::frame::{AudioFormat, AudioFrame};
use crate::output::{AudioSink, OutputFanout};
use crate::worker::{RunState, WorkerHandle, WorkerLoop};
use avpipe_core::metrics::keys;
use avpipe_core::{ClockDriveMode, MasterClock, Packet, PacketQueue, SharedMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Tunables of the audio worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioWorkerConfig {
    /// Consecutive frames without a timestamp before synthesizing them
    pub missing_pts_threshold: u32,
    /// Poll interval for the queue, pause and stop, milliseconds
    pub poll_interval_ms: u64,
    /// Sleep through each chunk when no sink can play it
    pub pace_without_sink: bool,
    /// Chunk length used without a sink, milliseconds
    pub fallback_chunk_ms: u64,
}

impl Default for AudioWorkerConfig {
    fn default() -> Self {
        Self {
            missing_pts_threshold: 5,
            poll_interval_ms: 20,
            pace_without_sink: true,
            fallback_chunk_ms: 20,
        }
    }
}

impl AudioWorkerConfig {
    /// Check values for consistency
    pub fn validate(&self) -> MediaResult<()> {
        if self.missing_pts_threshold == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "missing_pts_threshold must be positive".to_string(),
            });
        }
        if self.poll_interval_ms == 0 || self.fallback_chunk_ms == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "poll_interval_ms and fallback_chunk_ms must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Command executed by the audio worker at its next safe point
#[derive(Debug)]
pub enum AudioTask {
    /// Hot-swap the decoder
    SwapDecoder(Box<dyn AudioDecoder>),
    /// Replace the resampler
    SetResampler(Box<dyn Resampler>),
    /// Append a filter
    AddFilter(Box<dyn Filter<AudioFrame>>),
    /// Toggle filters by name
    SetFilterEnabled {
        /// Filter name
        name: String,
        /// New state
        enabled: bool,
    },
}

/// Handle to a running audio worker
pub type AudioWorkerHandle = WorkerHandle<AudioTask>;

/// Audio delivery loop
#[derive(Debug)]
pub struct AudioWorker {
    base: WorkerLoop<AudioTask>,
    config: AudioWorkerConfig,
    outputs: Arc<OutputFanout<dyn AudioSink>>,
    decoder: Option<Box<dyn AudioDecoder>>,
    resampler: Option<Box<dyn Resampler>>,
    filters: FilterChain<AudioFrame>,

    pending: Option<Packet>,
    sink_ready: bool,
    sink_format: Option<AudioFormat>,
    opened_for: Option<AudioFormat>,
    reconfigure: Option<(AudioFormat, f64)>,

    missing_pts: u32,
    synthesize: bool,
    next_timestamp: f64,
    sync_id: u32,
    eos_reached: bool,
}

impl AudioWorker {
    /// Create a worker reading `queue` and playing through `outputs`
    pub fn new(
        config: AudioWorkerConfig,
        queue: Arc<PacketQueue>,
        clock: Arc<MasterClock>,
        events: EventBus,
        metrics: SharedMetrics,
        outputs: Arc<OutputFanout<dyn AudioSink>>,
    ) -> Self {
        let base = WorkerLoop::new(
            StreamKind::Audio,
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
            resampler: None,
            filters: FilterChain::new(),
            pending: None,
            sink_ready: false,
            sink_format: None,
            opened_for: None,
            reconfigure: None,
            missing_pts: 0,
            synthesize: false,
            next_timestamp: 0.0,
            sync_id: 0,
            eos_reached: false,
        }
    }

    /// Set the decoder used from the first iteration
    pub fn with_decoder(mut self, decoder: Box<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Set the resampler
    pub fn with_resampler(mut self, resampler: Box<dyn Resampler>) -> Self {
        self.resampler = Some(resampler);
        self
    }

    /// Handle for other threads
    pub fn handle(&self) -> AudioWorkerHandle {
        self.base.handle()
    }

    /// Run until stopped.
    ///
    /// Returns immediately with an error when no usable decoder or no sink
    /// is configured.
    pub fn run(mut self) -> MediaResult<()> {
        if !self.decoder.as_ref().is_some_and(|d| d.is_available()) {
            warn!("audio worker has no usable decoder");
            self.base.control.set_run_state(RunState::Stopped);
            return Err(MediaError::NoDecoder {
                stream: StreamKind::Audio.to_string(),
            });
        }
        if self.outputs.is_empty() {
            warn!("audio worker has no output");
            self.base.control.set_run_state(RunState::Stopped);
            return Err(MediaError::NoOutput {
                stream: StreamKind::Audio.to_string(),
            });
        }

        self.base.begin();
        while !self.base.is_stopped() {
            self.iterate();
        }
        if let Some(sink) = self.outputs.first() {
            if sink.is_open() {
                sink.close();
            }
        }
        self.pending = None;
        self.base.finish();
        Ok(())
    }

    fn iterate(&mut self) {
        for task in self.base.take_tasks() {
            self.execute(task);
        }
        if self.base.is_stopped() {
            return;
        }
        if self.base.control.take_seek_request() && self.pending.take().is_some() {
            debug!("in-flight audio unit dropped for seek");
        }
        self.apply_reconfigure();
        if self.base.pause_gate() {
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
            self.base.stats.units_discarded += 1;
            return;
        }

        let Some(mut frame) = self.decode(packet) else {
            return;
        };
        self.fix_timestamp(&mut frame);

        let native = self
            .decoder
            .as_ref()
            .map_or(frame.format, |decoder| decoder.native_format());
        let sink = self.ready_sink(native);

        let clock = self.base.clock.clone();
        let mut ctx = FilterContext::new(
            StreamKind::Audio,
            clock.value(),
            clock.speed(),
            self.base.stats.frames_delivered,
        );
        self.filters.run(&mut ctx, &self.base.stats, &mut frame);

        let speed = playback_speed(&clock, sink.as_ref());
        let target = self.sink_format.filter(|_| sink.is_some()).unwrap_or(frame.format);
        let Some(frame) = self.resample(frame, target, speed) else {
            return;
        };
        self.play(sink.as_ref(), &frame, speed);
    }

    fn execute(&mut self, task: AudioTask) {
        match task {
            AudioTask::SwapDecoder(decoder) => {
                if !decoder.is_available() {
                    warn!(decoder = decoder.name(), "replacement decoder unavailable, keeping current");
                    return;
                }
                info!(decoder = decoder.name(), "audio decoder swapped");
                self.decoder = Some(decoder);
                self.pending = None;
                self.opened_for = None;
            }
            AudioTask::SetResampler(resampler) => {
                self.resampler = Some(resampler);
                if let Some(format) = self.sink_format {
                    let sink = self.outputs.first();
                    self.reconfigure = Some((format, playback_speed(&self.base.clock, sink.as_ref())));
                }
            }
            AudioTask::AddFilter(filter) => self.filters.add(filter),
            AudioTask::SetFilterEnabled { name, enabled } => {
                if !self.filters.set_enabled(&name, enabled) {
                    debug!(%name, "no filter to toggle");
                }
            }
        }
    }

    fn apply_reconfigure(&mut self) {
        let Some((format, speed)) = self.reconfigure.take() else {
            return;
        };
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };
        resampler.set_output_format(format);
        resampler.set_speed(speed);
        match resampler.prepare() {
            Ok(()) => debug!(?format, speed, "resampler renegotiated"),
            Err(err) => warn!(error = %err, "resampler prepare failed"),
        }
    }

    fn handle_discontinuity(&mut self, packet: &Packet) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.eos_reached = false;
        self.sync_id = packet.sync_id;
        self.next_timestamp = packet.pts.max(0.0);
        debug!(sync_id = packet.sync_id, pts = packet.pts, "audio decoder flushed");
    }

    fn decode(&mut self, mut packet: Packet) -> Option<AudioFrame> {
        let is_eos = packet.is_end_of_stream();
        let pts = packet.pts;
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
                warn!(error = %err, pts, "audio decode failed");
                self.base.stats.decode_errors += 1;
                self.base.metrics.increment(keys::AUDIO_DECODE_ERRORS);
                None
            }
        };

        let Some(mut frame) = frame else {
            if is_eos && !self.eos_reached {
                self.eos_reached = true;
                self.pending = None;
                info!("audio end of stream decoded");
                self.base.events.publish(PlaybackEvent::EndOfStreamDecoded {
                    stream: StreamKind::Audio,
                });
            }
            return None;
        };
        if !frame.is_valid() {
            trace!(pts, "empty audio frame ignored");
            return None;
        }
        if frame.timestamp <= 0.0 && pts > 0.0 {
            frame.timestamp = pts;
        }
        self.base.stats.frames_decoded += 1;
        self.base.metrics.increment(keys::AUDIO_FRAMES_DECODED);
        Some(frame)
    }

    /// Replace missing timestamps with the running end of the previous frame
    fn fix_timestamp(&mut self, frame: &mut AudioFrame) {
        if frame.timestamp > 0.0 {
            self.missing_pts = 0;
        } else {
            self.missing_pts = self.missing_pts.saturating_add(1);
            if self.missing_pts > self.config.missing_pts_threshold && !self.synthesize {
                self.synthesize = true;
                warn!(
                    missing = self.missing_pts,
                    "audio carries no usable timestamps, synthesizing from durations"
                );
                let old = self.base.clock.set_drive_mode(ClockDriveMode::AudioDriven);
                if old != ClockDriveMode::AudioDriven {
                    self.base.events.publish(PlaybackEvent::ClockModeChanged {
                        mode: ClockDriveMode::AudioDriven,
                    });
                }
            }
        }
        if self.synthesize || frame.timestamp <= 0.0 {
            frame.timestamp = self.next_timestamp;
        }
        self.next_timestamp = frame.timestamp + frame.duration();
    }

    /// The sink to play into, reopened when it became available or the
    /// decoder format changed. `None` skips delivery.
    fn ready_sink(&mut self, native: AudioFormat) -> Option<Arc<dyn AudioSink>> {
        let sink = self.outputs.first()?;
        if !sink.is_available() {
            if self.sink_ready {
                debug!(sink = sink.name(), "audio sink became unavailable");
            }
            self.sink_ready = false;
            return None;
        }
        if self.sink_ready && sink.is_open() && self.opened_for == Some(native) {
            return Some(sink);
        }
        match sink.open(native) {
            Ok(actual) => {
                info!(sink = sink.name(), ?native, ?actual, "audio sink opened");
                if self.sink_format != Some(actual) {
                    self.reconfigure = Some((actual, playback_speed(&self.base.clock, Some(&sink))));
                }
                self.sink_format = Some(actual);
                self.opened_for = Some(native);
                self.sink_ready = true;
                Some(sink)
            }
            Err(err) => {
                warn!(error = %err, sink = sink.name(), "audio sink open failed");
                self.sink_ready = false;
                None
            }
        }
    }

    fn resample(&mut self, frame: AudioFrame, target: AudioFormat, speed: f64) -> Option<AudioFrame> {
        let speed_changed = (speed - 1.0).abs() > f64::EPSILON;
        if frame.format == target && !speed_changed {
            return Some(frame);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            if frame.format != target {
                warn!(from = ?frame.format, to = ?target, "no resampler, audio frame dropped");
                self.base.stats.frames_dropped += 1;
                return None;
            }
            return Some(frame);
        };
        if (resampler.output_format() != target || resampler.speed() != speed)
            && self.reconfigure.is_none()
        {
            debug!(?target, speed, "resampler renegotiation deferred to next iteration");
            self.reconfigure = Some((target, speed));
        }
        match resampler.convert(&frame) {
            Ok(converted) if converted.format == target => Some(converted),
            Ok(converted) => {
                trace!(format = ?converted.format, "resampled frame in stale format dropped");
                self.base.stats.frames_dropped += 1;
                None
            }
            Err(err) => {
                warn!(error = %err, "audio resampling failed");
                self.base.stats.frames_dropped += 1;
                None
            }
        }
    }

    fn play(&mut self, sink: Option<&Arc<dyn AudioSink>>, frame: &AudioFrame, speed: f64) {
        let format = frame.format;
        let frame_bytes = format.bytes_per_frame().max(1);
        let chunk = match sink {
            Some(sink) => sink.buffer_size(),
            None => format.bytes_per_second() * self.config.fallback_chunk_ms as usize / 1000,
        };
        let chunk = (chunk / frame_bytes).max(1) * frame_bytes;
        let data = &frame.data;

        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk).min(data.len());
            let timestamp = frame.timestamp + format.duration_of(offset);
            match sink {
                Some(sink) => {
                    if let Err(err) = sink.play(&data[offset..end], timestamp) {
                        warn!(error = %err, timestamp, "audio chunk rejected");
                        self.base.stats.frames_dropped += 1;
                        return;
                    }
                    self.base.metrics.increment(keys::AUDIO_CHUNKS_PLAYED);
                }
                None if self.config.pace_without_sink => {
                    let seconds = format.duration_of(end - offset) / speed.max(f64::EPSILON);
                    self.base.wait(Duration::from_secs_f64(seconds));
                }
                None => {}
            }
            self.report_clock(timestamp);
            offset = end;
            if self.base.is_stopped() {
                break;
            }
        }
        self.base.stats.frames_delivered += 1;
        self.base.stats.last_timestamp = frame.timestamp;
        trace!(timestamp = frame.timestamp, bytes = data.len(), "audio frame played");
    }

    /// Drive the clock unless a sync window belongs to a seek this worker
    /// has not reached yet
    fn report_clock(&self, timestamp: f64) {
        let clock = &self.base.clock;
        let active = clock.active_sync_id();
        if active != 0 && active != self.sync_id {
            return;
        }
        clock.set_initial_value(timestamp);
        clock.update_value(timestamp);
    }
}

/// Playback speed of the clock times the device's own rate factor
fn playback_speed(clock: &MasterClock, sink: Option<&Arc<dyn AudioSink>>) -> f64 {
    clock.speed() * sink.map_or(1.0, |sink| sink.speed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AudioWorkerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.pace_without_sink);
        let config = AudioWorkerConfig {
            fallback_chunk_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
