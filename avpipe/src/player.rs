//! Player: owns the clock, queues, outputs and the two worker threads

use crate::config::PlayerConfig;
use crate::event::{EventFilter, EventStream, FilteredEventStream};
use avpipe_core::{MasterClock, Packet, PacketQueue, PipelineError, SharedMetrics, TimestampNormalizer};
use avpipe_media::{
    AudioDecoder, AudioSink, AudioTask, AudioWorker, AudioWorkerHandle, CaptureHandler, EventBus,
    FrameConverter, MediaError, MediaResult, OutputFanout, Resampler, RunState, SinkId, StreamKind,
    VideoDecoder, VideoSink, VideoTask, VideoWorker, VideoWorkerHandle,
};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

struct Running<T> {
    handle: T,
    thread: Option<JoinHandle<MediaResult<()>>>,
}

/// Composition root of the playback pipeline.
///
/// The demuxer side pushes packets, the application side adds sinks and
/// drives pause, seek and capture. Decoding and pacing run on two named
/// threads, one per stream.
pub struct Player {
    config: PlayerConfig,
    clock: Arc<MasterClock>,
    events: EventBus,
    metrics: SharedMetrics,
    video_queue: Arc<PacketQueue>,
    audio_queue: Arc<PacketQueue>,
    video_outputs: Arc<OutputFanout<dyn VideoSink>>,
    audio_outputs: Arc<OutputFanout<dyn AudioSink>>,
    normalizer: Box<dyn TimestampNormalizer>,

    video_decoder: Option<Box<dyn VideoDecoder>>,
    audio_decoder: Option<Box<dyn AudioDecoder>>,
    early_video_tasks: Vec<VideoTask>,
    early_audio_tasks: Vec<AudioTask>,

    video: Option<Running<VideoWorkerHandle>>,
    audio: Option<Running<AudioWorkerHandle>>,
    last_sync_id: u32,
}

impl Player {
    /// Create a stopped player
    pub fn new(config: PlayerConfig, metrics: SharedMetrics) -> MediaResult<Self> {
        config.validate()?;
        let clock = Arc::new(MasterClock::with_mode(config.clock_mode));
        let events = EventBus::new(config.event_capacity);
        let normalizer = Box::new(config.timebase);
        Ok(Self {
            clock,
            events,
            metrics,
            video_queue: Arc::new(PacketQueue::with_capacity(config.queue_capacity)),
            audio_queue: Arc::new(PacketQueue::with_capacity(config.queue_capacity)),
            video_outputs: Arc::new(OutputFanout::new()),
            audio_outputs: Arc::new(OutputFanout::new()),
            normalizer,
            video_decoder: None,
            audio_decoder: None,
            early_video_tasks: Vec::new(),
            early_audio_tasks: Vec::new(),
            video: None,
            audio: None,
            last_sync_id: 0,
            config,
        })
    }

    /// Configuration the player was built with
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Shared master clock
    pub fn clock(&self) -> Arc<MasterClock> {
        self.clock.clone()
    }

    /// Subscribe to every playback event
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Subscribe to the events matching `filter`
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventStream {
        FilteredEventStream::new(self.subscribe(), filter)
    }

    /// Whether the worker threads are running
    pub fn is_started(&self) -> bool {
        self.video.is_some() || self.audio.is_some()
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    /// Set the video decoder; hot-swapped when the worker runs
    pub fn set_video_decoder(&mut self, decoder: Box<dyn VideoDecoder>) {
        match self.video.as_ref() {
            Some(video) => video.handle.schedule(VideoTask::SwapDecoder(decoder)),
            None => self.video_decoder = Some(decoder),
        }
    }

    /// Set the audio decoder; hot-swapped when the worker runs
    pub fn set_audio_decoder(&mut self, decoder: Box<dyn AudioDecoder>) {
        match self.audio.as_ref() {
            Some(audio) => audio.handle.schedule(AudioTask::SwapDecoder(decoder)),
            None => self.audio_decoder = Some(decoder),
        }
    }

    /// Set the pixel converter used for formats the sinks reject
    pub fn set_frame_converter(&mut self, converter: Box<dyn FrameConverter>) {
        self.video_task(VideoTask::SetConverter(converter));
    }

    /// Set the resampler used when the audio sink needs another format
    pub fn set_resampler(&mut self, resampler: Box<dyn Resampler>) {
        self.audio_task(AudioTask::SetResampler(resampler));
    }

    /// Set the handler receiving captured frames
    pub fn set_capture_handler(&mut self, handler: Box<dyn CaptureHandler>) {
        self.video_task(VideoTask::SetCaptureHandler(handler));
    }

    /// Replace the raw timestamp normalizer used by `ingest_*`
    pub fn set_timestamp_normalizer(&mut self, normalizer: Box<dyn TimestampNormalizer>) {
        self.normalizer = normalizer;
    }

    /// Add a video sink; safe while frames are being delivered
    pub fn add_video_sink(&self, sink: Arc<dyn VideoSink>) -> SinkId {
        self.video_outputs.add_sink(sink)
    }

    /// Remove a video sink
    pub fn remove_video_sink(&self, id: SinkId) -> Option<Arc<dyn VideoSink>> {
        self.video_outputs.remove_sink(id)
    }

    /// Replace the audio sink
    pub fn set_audio_sink(&self, sink: Arc<dyn AudioSink>) -> SinkId {
        self.audio_outputs.clear();
        self.audio_outputs.add_sink(sink)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn a worker for every stream that has a decoder
    pub fn start(&mut self) -> MediaResult<()> {
        if self.is_started() {
            return Err(MediaError::InvalidState {
                message: "player already started".to_string(),
            });
        }
        if self.video_decoder.is_none() && self.audio_decoder.is_none() {
            return Err(MediaError::NoDecoder {
                stream: "any".to_string(),
            });
        }
        if self.video_decoder.is_some() && self.video_outputs.is_empty() {
            return Err(MediaError::NoOutput {
                stream: StreamKind::Video.to_string(),
            });
        }
        if self.audio_decoder.is_some() && self.audio_outputs.is_empty() {
            return Err(MediaError::NoOutput {
                stream: StreamKind::Audio.to_string(),
            });
        }
        self.video_queue.restart();
        self.audio_queue.restart();

        if let Some(decoder) = self.video_decoder.take() {
            let worker = VideoWorker::new(
                self.config.video.clone(),
                self.video_queue.clone(),
                self.clock.clone(),
                self.events.clone(),
                self.metrics.clone(),
                self.video_outputs.clone(),
            )
            .with_decoder(decoder);
            let handle = worker.handle();
            for task in self.early_video_tasks.drain(..) {
                handle.schedule(task);
            }
            let thread = spawn_worker(StreamKind::Video, move || worker.run())?;
            self.video = Some(Running {
                handle,
                thread: Some(thread),
            });
        }

        if let Some(decoder) = self.audio_decoder.take() {
            let worker = AudioWorker::new(
                self.config.audio.clone(),
                self.audio_queue.clone(),
                self.clock.clone(),
                self.events.clone(),
                self.metrics.clone(),
                self.audio_outputs.clone(),
            )
            .with_decoder(decoder);
            let handle = worker.handle();
            for task in self.early_audio_tasks.drain(..) {
                handle.schedule(task);
            }
            match spawn_worker(StreamKind::Audio, move || worker.run()) {
                Ok(thread) => {
                    self.audio = Some(Running {
                        handle,
                        thread: Some(thread),
                    })
                }
                Err(err) => {
                    let _ = self.stop();
                    return Err(err);
                }
            }
        }

        info!(
            video = self.video.is_some(),
            audio = self.audio.is_some(),
            mode = ?self.clock.drive_mode(),
            "player started"
        );
        Ok(())
    }

    /// Stop both workers and join their threads.
    ///
    /// Returns the first error a worker exited with.
    pub fn stop(&mut self) -> MediaResult<()> {
        if let Some(video) = self.video.as_ref() {
            video.handle.stop();
        }
        if let Some(audio) = self.audio.as_ref() {
            audio.handle.stop();
        }
        self.video_queue.stop();
        self.audio_queue.stop();

        let mut result = Ok(());
        if let Some(video) = self.video.take() {
            result = result.and(join_worker(StreamKind::Video, video.thread));
        }
        if let Some(audio) = self.audio.take() {
            result = result.and(join_worker(StreamKind::Audio, audio.thread));
        }
        debug!("player stopped");
        result
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Queue a video unit
    pub fn push_video(&self, packet: Packet) {
        self.video_queue.push(packet);
    }

    /// Queue an audio unit
    pub fn push_audio(&self, packet: Packet) {
        self.audio_queue.push(packet);
    }

    /// Queue a video unit stamped in raw container units
    pub fn ingest_video(&self, data: Bytes, raw_pts: i64, key_frame: bool) {
        let pts = self.normalizer.normalize(raw_pts);
        self.push_video(Packet::new(data, pts).with_key_frame(key_frame));
    }

    /// Queue an audio unit stamped in raw container units
    pub fn ingest_audio(&self, data: Bytes, raw_pts: i64) {
        let pts = self.normalizer.normalize(raw_pts);
        self.push_audio(Packet::new(data, pts));
    }

    /// Whether the video queue reached its soft capacity
    pub fn is_video_queue_full(&self) -> bool {
        self.video_queue.is_full()
    }

    /// Whether the audio queue reached its soft capacity
    pub fn is_audio_queue_full(&self) -> bool {
        self.audio_queue.is_full()
    }

    /// Queue end-of-stream markers for both streams
    pub fn end_of_stream(&self) {
        self.push_video(Packet::end_of_stream());
        self.push_audio(Packet::end_of_stream());
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Seek both streams to `target` seconds.
    ///
    /// In-flight work is dropped, the queues are cleared and a discontinuity
    /// unit carrying a fresh sync id is queued for each stream. Units from
    /// the new position are pushed after this returns. Returns the sync id.
    pub fn seek(&mut self, target: f64) -> u32 {
        let sync_id = self.next_sync_id();
        let target = target.max(0.0);
        if let Some(video) = self.video.as_ref() {
            video.handle.request_seek();
        }
        if let Some(audio) = self.audio.as_ref() {
            audio.handle.request_seek();
        }
        self.video_queue.clear();
        self.audio_queue.clear();
        self.video_queue.push(Packet::discontinuity(sync_id, target));
        self.audio_queue.push(Packet::discontinuity(sync_id, target));
        info!(target, sync_id, "seek requested");
        sync_id
    }

    /// Pause or resume both workers
    pub fn pause(&self, paused: bool) {
        if let Some(video) = self.video.as_ref() {
            video.handle.pause(paused);
        }
        if let Some(audio) = self.audio.as_ref() {
            audio.handle.pause(paused);
        }
        self.clock.pause(paused);
    }

    /// Whether every running worker has actually paused
    pub fn is_paused(&self) -> bool {
        let video = self.video.as_ref().map(|v| v.handle.is_paused());
        let audio = self.audio.as_ref().map(|a| a.handle.is_paused());
        match (video, audio) {
            (None, None) => false,
            (v, a) => v.unwrap_or(true) && a.unwrap_or(true),
        }
    }

    /// Lifecycle state of a worker; `Idle` before start
    pub fn run_state(&self, stream: StreamKind) -> RunState {
        let state = match stream {
            StreamKind::Video => self.video.as_ref().map(|v| v.handle.run_state()),
            StreamKind::Audio => self.audio.as_ref().map(|a| a.handle.run_state()),
        };
        state.unwrap_or(RunState::Idle)
    }

    /// Capture the last displayed frame
    pub fn capture(&self) -> MediaResult<()> {
        match self.video.as_ref() {
            Some(video) => {
                video.handle.request_capture();
                Ok(())
            }
            None => Err(MediaError::InvalidState {
                message: "no video worker running".to_string(),
            }),
        }
    }

    /// Force a video frame rate, or `None` to pace by timestamps
    pub fn set_frame_rate(&mut self, fps: Option<f64>) {
        self.video_task(VideoTask::SetFrameRate(fps));
    }

    /// Picture adjustments, each clamped to `-100..=100`
    pub fn set_equalizer(&mut self, brightness: i32, contrast: i32, saturation: i32) {
        self.video_task(VideoTask::SetEqualizer {
            brightness,
            contrast,
            saturation,
        });
    }

    /// Blank every video sink
    pub fn clear_video_outputs(&mut self) {
        self.video_task(VideoTask::ClearOutputs);
    }

    /// Playback speed multiplier, applied to video pacing and audio resampling
    pub fn set_speed(&self, speed: f64) {
        self.clock.set_speed(speed);
    }

    fn video_task(&mut self, task: VideoTask) {
        match self.video.as_ref() {
            Some(video) => video.handle.schedule(task),
            None => self.early_video_tasks.push(task),
        }
    }

    fn audio_task(&mut self, task: AudioTask) {
        match self.audio.as_ref() {
            Some(audio) => audio.handle.schedule(task),
            None => self.early_audio_tasks.push(task),
        }
    }

    fn next_sync_id(&mut self) -> u32 {
        self.last_sync_id = self.last_sync_id.wrapping_add(1).max(1);
        self.last_sync_id
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("clock_mode", &self.clock.drive_mode())
            .field("video", &self.run_state(StreamKind::Video))
            .field("audio", &self.run_state(StreamKind::Audio))
            .field("video_sinks", &self.video_outputs.len())
            .field("audio_sinks", &self.audio_outputs.len())
            .field("last_sync_id", &self.last_sync_id)
            .finish()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if self.is_started() {
            if let Err(err) = self.stop() {
                warn!(error = %err, "worker failed while dropping player");
            }
        }
    }
}

fn spawn_worker<F>(stream: StreamKind, run: F) -> MediaResult<JoinHandle<MediaResult<()>>>
where
    F: FnOnce() -> MediaResult<()> + Send + 'static,
{
    thread::Builder::new()
        .name(format!("avpipe-{stream}"))
        .spawn(run)
        .map_err(|err| {
            MediaError::Core(PipelineError::Worker {
                worker: stream.to_string(),
                reason: err.to_string(),
            })
        })
}

fn join_worker(stream: StreamKind, thread: Option<JoinHandle<MediaResult<()>>>) -> MediaResult<()> {
    let Some(thread) = thread else {
        return Ok(());
    };
    match thread.join() {
        Ok(result) => result,
        Err(_) => Err(MediaError::Core(PipelineError::Worker {
            worker: stream.to_string(),
            reason: "thread panicked".to_string(),
        })),
    }
}
