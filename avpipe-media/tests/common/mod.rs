//! Shared mocks and helpers for the worker integration tests

#![allow(dead_code)]

use avpipe_core::*;
use avpipe_media::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

// ============================================================================
// DECODERS
// ============================================================================

/// Observations shared between a mock decoder and the test
#[derive(Debug, Default)]
pub struct DecoderProbe {
    pub decoded: AtomicUsize,
    pub flushes: AtomicUsize,
    pub modes: Mutex<Vec<DecodeMode>>,
    pub decoded_pts: Mutex<Vec<f64>>,
}

impl DecoderProbe {
    pub fn decoded(&self) -> usize {
        self.decoded.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

/// Decodes every unit into a small picture stamped with the unit pts
#[derive(Debug)]
pub struct MockVideoDecoder {
    pub name: String,
    pub probe: Arc<DecoderProbe>,
    pub format: PixelFormat,
    pub fail_pts: Vec<f64>,
    current: Option<VideoFrame>,
}

impl MockVideoDecoder {
    pub fn new(probe: Arc<DecoderProbe>) -> Self {
        Self {
            name: "mock-video".to_string(),
            probe,
            format: PixelFormat::Yuv420p,
            fail_pts: Vec::new(),
            current: None,
        }
    }

    pub fn with_format(probe: Arc<DecoderProbe>, format: PixelFormat) -> Self {
        Self {
            format,
            ..Self::new(probe)
        }
    }

    pub fn failing(probe: Arc<DecoderProbe>, fail_pts: Vec<f64>) -> Self {
        Self {
            fail_pts,
            ..Self::new(probe)
        }
    }
}

impl VideoDecoder for MockVideoDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&mut self, packet: &Packet) -> MediaResult<usize> {
        if packet.is_end_of_stream() {
            self.current = None;
            return Ok(0);
        }
        self.probe.decoded.fetch_add(1, Ordering::SeqCst);
        self.probe.decoded_pts.lock().push(packet.pts);
        if self.fail_pts.contains(&packet.pts) {
            return Err(MediaError::DecodingFailed {
                codec: self.name.clone(),
                reason: "corrupt unit".to_string(),
            });
        }
        self.current = Some(
            VideoFrame::new(packet.pts, 4, 4, self.format, vec![16u8; 24])
                .with_key_frame(packet.is_key_frame),
        );
        Ok(packet.remaining_len())
    }

    fn frame(&mut self) -> Option<VideoFrame> {
        self.current.take()
    }

    fn flush(&mut self) {
        self.current = None;
        self.probe.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn set_decode_mode(&mut self, mode: DecodeMode) {
        self.probe.modes.lock().push(mode);
    }
}

/// Turns each unit into PCM of the unit's byte length
#[derive(Debug)]
pub struct MockAudioDecoder {
    pub probe: Arc<DecoderProbe>,
    pub format: AudioFormat,
    current: Option<AudioFrame>,
}

impl MockAudioDecoder {
    pub fn new(probe: Arc<DecoderProbe>, format: AudioFormat) -> Self {
        Self {
            probe,
            format,
            current: None,
        }
    }
}

impl AudioDecoder for MockAudioDecoder {
    fn name(&self) -> &str {
        "mock-audio"
    }

    fn native_format(&self) -> AudioFormat {
        self.format
    }

    fn decode(&mut self, packet: &Packet) -> MediaResult<usize> {
        if packet.is_end_of_stream() {
            self.current = None;
            return Ok(0);
        }
        self.probe.decoded.fetch_add(1, Ordering::SeqCst);
        self.probe.decoded_pts.lock().push(packet.pts);
        self.current = Some(AudioFrame::new(
            packet.pts,
            self.format,
            packet.remaining().to_vec(),
        ));
        Ok(packet.remaining_len())
    }

    fn frame(&mut self) -> Option<AudioFrame> {
        self.current.take()
    }

    fn flush(&mut self) {
        self.current = None;
        self.probe.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Relabels the picture with the target format
#[derive(Debug, Default, Clone)]
pub struct MockConverter {
    pub equalizer: Arc<Mutex<Option<Equalizer>>>,
    pub conversions: Arc<AtomicUsize>,
}

impl FrameConverter for MockConverter {
    fn convert(&mut self, frame: &VideoFrame, target: PixelFormat) -> MediaResult<VideoFrame> {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        let mut converted = frame.clone();
        converted.pixel_format = target;
        Ok(converted)
    }

    fn set_equalizer(&mut self, equalizer: Equalizer) {
        *self.equalizer.lock() = Some(equalizer);
    }
}

/// Passes samples through, relabelled with the negotiated format
#[derive(Debug)]
pub struct MockResampler {
    pub format: AudioFormat,
    pub speed: f64,
    pub speeds: Arc<Mutex<Vec<f64>>>,
}

impl MockResampler {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            speed: 1.0,
            speeds: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Resampler for MockResampler {
    fn set_output_format(&mut self, format: AudioFormat) {
        self.format = format;
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
        self.speeds.lock().push(speed);
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn prepare(&mut self) -> MediaResult<()> {
        Ok(())
    }

    fn convert(&mut self, frame: &AudioFrame) -> MediaResult<AudioFrame> {
        Ok(AudioFrame::new(frame.timestamp, self.format, frame.data.to_vec()))
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Records every frame it receives
#[derive(Debug, Default)]
pub struct RecordingVideoSink {
    pub frames: Mutex<Vec<VideoFrame>>,
}

impl RecordingVideoSink {
    pub fn timestamps(&self) -> Vec<f64> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.is_valid())
            .map(|f| f.timestamp)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl VideoSink for RecordingVideoSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn is_format_supported(&self, format: PixelFormat) -> bool {
        matches!(format, PixelFormat::Yuv420p | PixelFormat::Rgb32)
    }

    fn preferred_format(&self) -> PixelFormat {
        PixelFormat::Rgb32
    }

    fn receive(&self, frame: &VideoFrame) {
        self.frames.lock().push(frame.clone());
    }
}

/// Records chunks written to it
#[derive(Debug)]
pub struct RecordingAudioSink {
    pub available: AtomicBool,
    pub open: AtomicBool,
    pub opens: AtomicUsize,
    pub buffer_size: usize,
    pub chunks: Mutex<Vec<(usize, f64)>>,
}

impl RecordingAudioSink {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            available: AtomicBool::new(true),
            open: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            buffer_size,
            chunks: Mutex::new(Vec::new()),
        }
    }

    pub fn chunks(&self) -> Vec<(usize, f64)> {
        self.chunks.lock().clone()
    }
}

impl AudioSink for RecordingAudioSink {
    fn name(&self) -> &str {
        "recording-audio"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn open(&self, format: AudioFormat) -> MediaResult<AudioFormat> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        Ok(format)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn play(&self, data: &[u8], timestamp: f64) -> MediaResult<()> {
        self.chunks.lock().push((data.len(), timestamp));
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Drain events until one matches or `timeout` passes; returns everything seen
pub fn events_until(
    rx: &mut broadcast::Receiver<PlaybackEvent>,
    timeout: Duration,
    mut done: impl FnMut(&PlaybackEvent) -> bool,
) -> (Vec<PlaybackEvent>, bool) {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) => {
                let matched = done(&event);
                seen.push(event);
                if matched {
                    return (seen, true);
                }
            }
            Err(broadcast::error::TryRecvError::Empty) => thread::sleep(Duration::from_millis(2)),
            Err(_) => break,
        }
    }
    (seen, false)
}

/// Everything currently buffered for `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

/// Fast-polling config for tests
pub fn video_config() -> VideoWorkerConfig {
    VideoWorkerConfig {
        poll_interval_ms: 5,
        seek_settle_ms: 2,
        ..Default::default()
    }
}

/// A video worker running on its own thread with a recording sink
pub struct VideoHarness {
    pub queue: Arc<PacketQueue>,
    pub clock: Arc<MasterClock>,
    pub events: EventBus,
    pub outputs: Arc<OutputFanout<dyn VideoSink>>,
    pub sink: Arc<RecordingVideoSink>,
    pub probe: Arc<DecoderProbe>,
    pub handle: VideoWorkerHandle,
    pub rx: broadcast::Receiver<PlaybackEvent>,
    thread: Option<JoinHandle<MediaResult<()>>>,
}

impl VideoHarness {
    pub fn start(config: VideoWorkerConfig, clock: MasterClock) -> Self {
        Self::start_with(config, clock, |worker| worker)
    }

    pub fn start_with(
        config: VideoWorkerConfig,
        clock: MasterClock,
        customize: impl FnOnce(VideoWorker) -> VideoWorker,
    ) -> Self {
        let queue = Arc::new(PacketQueue::new());
        let clock = Arc::new(clock);
        let events = EventBus::new(1024);
        let rx = events.subscribe();
        let outputs: Arc<OutputFanout<dyn VideoSink>> = Arc::new(OutputFanout::new());
        let sink = Arc::new(RecordingVideoSink::default());
        outputs.add_sink(sink.clone());
        let probe = Arc::new(DecoderProbe::default());

        let worker = VideoWorker::new(
            config,
            queue.clone(),
            clock.clone(),
            events.clone(),
            noop_metrics(),
            outputs.clone(),
        )
        .with_decoder(Box::new(MockVideoDecoder::new(probe.clone())));
        let worker = customize(worker);
        let handle = worker.handle();
        let thread = thread::Builder::new()
            .name("video-test".to_string())
            .spawn(move || worker.run())
            .expect("spawn video worker");

        Self {
            queue,
            clock,
            events,
            outputs,
            sink,
            probe,
            handle,
            rx,
            thread: Some(thread),
        }
    }

    pub fn push(&self, packet: Packet) {
        self.queue.push(packet);
    }

    pub fn stop(&mut self) -> MediaResult<()> {
        self.handle.stop();
        match self.thread.take() {
            Some(thread) => thread.join().expect("video worker panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for VideoHarness {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Unit with a pts, 8 bytes of payload
pub fn unit(pts: f64, key: bool) -> Packet {
    Packet::new(vec![0u8; 8], pts).with_key_frame(key)
}
