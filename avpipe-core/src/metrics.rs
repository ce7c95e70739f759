//! Injectable metrics seam
//!
//! Workers never keep process-wide timers; whoever composes the pipeline
//! hands them a recorder.

use std::fmt::Debug;
use std::sync::Arc;

/// Well-known metric keys published by the workers
pub mod keys {
    /// Video frames handed to the output fanout
    pub const VIDEO_FRAMES_DELIVERED: &str = "video.frames_delivered";
    /// Video frames decoded
    pub const VIDEO_FRAMES_DECODED: &str = "video.frames_decoded";
    /// Late video frames not delivered
    pub const VIDEO_FRAMES_LATE: &str = "video.frames_late";
    /// Frames decoded but not rendered by the skip policy
    pub const VIDEO_FRAMES_SKIPPED: &str = "video.frames_skipped";
    /// Units discarded while waiting for a key frame
    pub const VIDEO_UNITS_DISCARDED: &str = "video.units_discarded";
    /// GOPs abandoned under overload
    pub const VIDEO_GOPS_ABANDONED: &str = "video.gops_abandoned";
    /// Video decode failures
    pub const VIDEO_DECODE_ERRORS: &str = "video.decode_errors";
    /// Deficit of each paced video frame, seconds
    pub const VIDEO_DEFICIT: &str = "video.deficit";
    /// Audio frames decoded
    pub const AUDIO_FRAMES_DECODED: &str = "audio.frames_decoded";
    /// Audio chunks written to the sink
    pub const AUDIO_CHUNKS_PLAYED: &str = "audio.chunks_played";
    /// Audio decode failures
    pub const AUDIO_DECODE_ERRORS: &str = "audio.decode_errors";
}

/// Sink for counters and observations
pub trait MetricsRecorder: Send + Sync + Debug {
    /// Count one occurrence of `key`
    fn increment(&self, key: &'static str);

    /// Record a sampled value for `key`
    fn observe(&self, key: &'static str, value: f64);
}

/// Recorder that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn increment(&self, _key: &'static str) {}

    fn observe(&self, _key: &'static str, _value: f64) {}
}

/// Shared recorder handle
pub type SharedMetrics = Arc<dyn MetricsRecorder>;

/// Convenience constructor for a no-op shared recorder
pub fn noop_metrics() -> SharedMetrics {
    Arc::new(NoopMetrics)
}
