//! Structured debug logging system

use avpipe_core::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Settings of the fmt subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set, e.g. `info` or
    /// `avpipe_media=trace,info`
    pub default_filter: String,
    /// Print the module target of each event
    pub with_target: bool,
    /// Print the name of the emitting thread
    pub with_thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            with_target: true,
            with_thread_names: true,
        }
    }
}

/// Debug logger for structured logging
#[derive(Debug, Default)]
pub struct DebugLogger {
    config: LogConfig,
}

impl DebugLogger {
    /// Create a logger with the given settings
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    /// Settings this logger installs
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the filter: `RUST_LOG` when set, the configured default otherwise
    pub fn env_filter(&self) -> PipelineResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.config.default_filter).map_err(|err| {
            PipelineError::InvalidConfiguration {
                field: "default_filter".to_string(),
                reason: err.to_string(),
            }
        })
    }

    /// Install the global subscriber.
    ///
    /// Returns `Ok(false)` when a subscriber was already installed.
    pub fn install(&self) -> PipelineResult<bool> {
        let filter = self.env_filter()?;
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(self.config.with_target)
            .with_thread_names(self.config.with_thread_names)
            .try_init()
            .is_ok();
        if installed {
            tracing::debug!(filter = %self.config.default_filter, "logging initialised");
        }
        Ok(installed)
    }

    /// Initialize logging system with default settings
    pub fn init_logging() -> PipelineResult<()> {
        Self::default().install().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let logger = DebugLogger::new(LogConfig {
            default_filter: "avpipe_media=notalevel".to_string(),
            ..Default::default()
        });
        if std::env::var("RUST_LOG").is_err() {
            let err = logger.env_filter().unwrap_err();
            assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
        }
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        assert!(DebugLogger::init_logging().is_ok());
        assert!(DebugLogger::init_logging().is_ok());
        assert!(!DebugLogger::default().install().unwrap());
    }
}
