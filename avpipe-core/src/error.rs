//! Error types for the avpipe playback core

use std::time::Duration;
use thiserror::Error;

/// Main error type for core pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Offending configuration field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// The packet queue has been stopped and no longer hands out units
    #[error("Packet queue stopped")]
    QueueStopped,

    /// Sync window bookkeeping was violated
    #[error("Sync window error for id {sync_id}: {reason}")]
    SyncWindow {
        /// Sync id the operation referred to
        sync_id: u32,
        /// What went wrong
        reason: String,
    },

    /// Invalid data error
    #[error("Invalid data: {reason}")]
    InvalidData {
        /// Reason for invalid data
        reason: String,
    },

    /// Operation timed out error
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Worker thread could not be spawned or joined
    #[error("Worker {worker} failed: {reason}")]
    Worker {
        /// Worker name
        worker: String,
        /// Failure reason
        reason: String,
    },
}

/// Result type alias for core pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            PipelineError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            PipelineError::MissingConfiguration { .. } => "MISSING_CONFIGURATION".to_string(),
            PipelineError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            PipelineError::InvalidState { .. } => "INVALID_STATE".to_string(),
            PipelineError::QueueStopped => "QUEUE_STOPPED".to_string(),
            PipelineError::SyncWindow { .. } => "SYNC_WINDOW".to_string(),
            PipelineError::InvalidData { .. } => "INVALID_DATA".to_string(),
            PipelineError::Timeout { .. } => "TIMEOUT".to_string(),
            PipelineError::Worker { .. } => "WORKER_FAILED".to_string(),
        }
    }

    /// Check if the error leaves the pipeline usable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout { .. }
                | PipelineError::InvalidData { .. }
                | PipelineError::SyncWindow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PipelineError::QueueStopped.error_code(), "QUEUE_STOPPED");
        let err = PipelineError::MissingConfiguration {
            field: "video_decoder".to_string(),
        };
        assert_eq!(err.error_code(), "MISSING_CONFIGURATION");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::SyncWindow {
            sync_id: 3,
            reason: "already closed".to_string(),
        };
        assert_eq!(err.to_string(), "Sync window error for id 3: already closed");
        assert!(err.is_recoverable());
    }
}
