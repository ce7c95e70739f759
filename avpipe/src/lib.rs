//! # avpipe - Real-Time Audio/Video Delivery
//!
//! avpipe is the delivery core of a media player. Demuxed packets go in,
//! paced frames come out: a shared master clock decides when each frame is
//! due, and the video worker degrades gracefully under overload by dropping
//! non-reference frames, skipping output, or abandoning a lagging GOP.
//!
//! ## Key Features
//!
//! - **Master clock**: audio-, video- or externally-driven, with sync
//!   windows bracketing every seek
//! - **Adaptive video pacing**: late frames dropped, catch-up without
//!   stalling audio
//! - **Safe fanout**: sinks added and removed while frames are delivered
//! - **Pluggable components**: decoders, converters, resamplers and sinks
//!   are traits supplied by the embedding application
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use avpipe::{noop_metrics, Player, PlayerConfig};
//!
//! fn main() -> Result<(), avpipe::MediaError> {
//!     let mut player = Player::new(PlayerConfig::default(), noop_metrics())?;
//!
//!     // Decoders and sinks come from the embedding application:
//!     // player.set_video_decoder(Box::new(my_decoder));
//!     // player.add_video_sink(std::sync::Arc::new(my_window));
//!
//!     let mut events = player.subscribe();
//!     player.start()?;
//!     player.seek(12.0);
//!     while let Some(event) = events.try_next() {
//!         println!("Playback event: {:?}", event);
//!     }
//!     player.stop()
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use avpipe_core::{
    noop_metrics, ClockDriveMode, MasterClock, MetricsRecorder, NoopMetrics, Packet, PacketQueue,
    PipelineError, PipelineResult, ScaledTimestamps, SharedMetrics, SyncWindowStats, Timebase,
    TimestampNormalizer, UNKNOWN_PTS,
};

pub use avpipe_media::{
    AudioDecoder, AudioFormat, AudioFrame, AudioSink, CaptureHandler, DecodeMode, Equalizer,
    Filter, FrameConverter, MediaError, MediaResult, MemoryCapture, PixelFormat, PlaybackEvent,
    Resampler, RunState, SampleFormat, SinkId, StreamKind, VideoDecoder, VideoFrame, VideoSink,
};

#[cfg(feature = "diagnostics")]
pub use avpipe_diagnostics::{DebugLogger, LogConfig, MetricsSnapshot, PipelineMetrics};

// Public API modules
pub mod config;
pub mod event;
pub mod player;

// Re-export main API types
pub use config::PlayerConfig;
pub use event::{EventFilter, EventStream, FilteredEventStream};
pub use player::Player;

/// Install the tracing subscriber described by `config.logging`.
///
/// Returns `Ok(false)` when a subscriber was already installed.
#[cfg(feature = "diagnostics")]
pub fn init_logging(config: &PlayerConfig) -> PipelineResult<bool> {
    DebugLogger::new(config.logging.clone()).install()
}
