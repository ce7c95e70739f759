//! # avpipe Diagnostics
//!
//! Logging setup and metrics collection for the avpipe playback pipeline.
//! Provides structured logging initialisation and an injectable metrics
//! collector with per-key rate measurement.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;
pub mod metrics;

// Re-export main types
pub use debug_logger::{DebugLogger, LogConfig};
pub use metrics::{FrequencyMeter, MetricsSnapshot, Observation, PipelineMetrics};
