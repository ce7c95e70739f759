//! # avpipe Media
//!
//! Real-time delivery of decoded media. The audio and video workers pull
//! packets from their queues, decode them through pluggable decoders, pace
//! frames against the shared master clock and hand them to output sinks.
//! Pause, seek, end of stream, decoder hot-swap and sustained overload are
//! all handled inside the worker loops.

#![warn(clippy::all)]

pub mod audio_worker;
pub mod capture;
pub mod codecs;
pub mod error;
pub mod events;
pub mod filter;
pub mod frame;
pub mod output;
pub mod video_worker;
pub mod worker;

// Re-export main types
pub use audio_worker::{AudioTask, AudioWorker, AudioWorkerConfig, AudioWorkerHandle};
pub use capture::{CaptureHandler, MemoryCapture};
pub use codecs::{AudioDecoder, DecodeMode, Equalizer, FrameConverter, Resampler, VideoDecoder};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use events::{EventBus, PlaybackEvent, StreamKind, DEFAULT_EVENT_CAPACITY};
pub use filter::{Filter, FilterChain, FilterContext};
pub use frame::{AudioFormat, AudioFrame, PixelFormat, SampleFormat, VideoFrame};
pub use output::{AudioSink, OutputFanout, SinkId, VideoSink};
pub use video_worker::{VideoTask, VideoWorker, VideoWorkerConfig, VideoWorkerHandle};
pub use worker::{RunState, WorkerControl, WorkerHandle, WorkerLoop, WorkerStats};
