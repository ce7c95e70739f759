//! Media error types and handling
//!
//! Errors raised by decoders, converters, sinks and the worker loops. The
//! loops treat anything [`MediaError::is_recoverable`] as local to one unit
//! or frame; the rest stop the worker before it starts.

use avpipe_core::PipelineError;
use thiserror::Error;

/// Main error type for media delivery operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// Core pipeline error
    #[error(transparent)]
    Core(#[from] PipelineError),

    /// Worker started without a decoder
    #[error("No decoder configured for {stream} worker")]
    NoDecoder {
        /// Stream the worker serves
        stream: String,
    },

    /// Worker started without any output destination
    #[error("No output configured for {stream} worker")]
    NoOutput {
        /// Stream the worker serves
        stream: String,
    },

    /// Decoding operation failed
    #[error("Decoding failed: {codec} - {reason}")]
    DecodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Unsupported format error
    #[error("Unsupported format: {format}")]
    UnsupportedFormat {
        /// Format description
        format: String,
    },

    /// Sink currently not available
    #[error("Sink not available: {sink}")]
    SinkUnavailable {
        /// Sink name
        sink: String,
    },

    /// Sink refused to open with the negotiated format
    #[error("Sink open failed: {sink} - {reason}")]
    SinkOpenFailed {
        /// Sink name
        sink: String,
        /// Failure reason
        reason: String,
    },

    /// Pixel or sample conversion failed
    #[error("Conversion failed: {from} -> {to}")]
    ConversionFailed {
        /// Source format
        from: String,
        /// Target format
        to: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Worker is in a state that does not allow the operation
    #[error("Invalid state: {message}")]
    InvalidState {
        /// State error message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Core(err) => err.is_recoverable(),
            MediaError::DecodingFailed { .. } => true,
            MediaError::UnsupportedFormat { .. } => true,
            MediaError::SinkUnavailable { .. } => true,
            MediaError::SinkOpenFailed { .. } => true,
            MediaError::ConversionFailed { .. } => true,
            MediaError::InvalidFrameData { .. } => true,
            MediaError::NoDecoder { .. } => false,
            MediaError::NoOutput { .. } => false,
            MediaError::InvalidConfiguration { .. } => false,
            MediaError::InvalidState { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Core(_) => ErrorCategory::Pipeline,
            MediaError::NoDecoder { .. } => ErrorCategory::Configuration,
            MediaError::NoOutput { .. } => ErrorCategory::Configuration,
            MediaError::DecodingFailed { .. } => ErrorCategory::Codec,
            MediaError::UnsupportedFormat { .. } => ErrorCategory::Format,
            MediaError::SinkUnavailable { .. } => ErrorCategory::Output,
            MediaError::SinkOpenFailed { .. } => ErrorCategory::Output,
            MediaError::ConversionFailed { .. } => ErrorCategory::Format,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::InvalidState { .. } => ErrorCategory::State,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Errors raised by the core building blocks
    Pipeline,
    /// Configuration and startup precondition errors
    Configuration,
    /// Codec-related errors
    Codec,
    /// Format negotiation and conversion errors
    Format,
    /// Sink errors
    Output,
    /// Data validation errors
    Data,
    /// State management errors
    State,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err = MediaError::NoDecoder {
            stream: "video".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!err.is_recoverable());

        let err = MediaError::DecodingFailed {
            codec: "h264".to_string(),
            reason: "corrupt slice".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Codec);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_error_from_core() {
        let media_error = MediaError::from(PipelineError::QueueStopped);
        assert_eq!(media_error.to_string(), "Packet queue stopped");
        match media_error {
            MediaError::Core(PipelineError::QueueStopped) => (),
            _ => panic!("Expected Core error variant"),
        }
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::InvalidFrameData {
            expected: 1024,
            actual: 512,
        };
        assert_eq!(
            error.to_string(),
            "Invalid frame data: expected 1024 bytes, got 512"
        );
    }
}
