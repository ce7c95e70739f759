//! # avpipe Core
//!
//! Leaf building blocks of the avpipe playback core: compressed packets,
//! the blocking packet queue that hands them from ingestion to a worker,
//! and the master clock both workers discipline their timing against.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod metrics;
pub mod packet;
pub mod queue;

// Re-export main types
pub use clock::{ClockDriveMode, MasterClock, SyncWindowStats};
pub use error::{PipelineError, PipelineResult};
pub use metrics::{noop_metrics, MetricsRecorder, NoopMetrics, SharedMetrics};
pub use packet::{Packet, ScaledTimestamps, Timebase, TimestampNormalizer, UNKNOWN_PTS};
pub use queue::{PacketQueue, DEFAULT_QUEUE_CAPACITY};
