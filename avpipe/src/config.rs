//! Configuration types and defaults

use avpipe_core::{ClockDriveMode, PipelineError, Timebase, DEFAULT_QUEUE_CAPACITY};
use avpipe_media::{AudioWorkerConfig, MediaError, MediaResult, VideoWorkerConfig, DEFAULT_EVENT_CAPACITY};
use serde::{Deserialize, Serialize};

#[cfg(feature = "diagnostics")]
use avpipe_diagnostics::LogConfig;

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Video worker tunables
    pub video: VideoWorkerConfig,
    /// Audio worker tunables
    pub audio: AudioWorkerConfig,
    /// Initial master clock mode
    pub clock_mode: ClockDriveMode,
    /// Soft capacity of each packet queue
    pub queue_capacity: usize,
    /// Buffered events per subscriber
    pub event_capacity: usize,
    /// Time base of raw timestamps handed to the `ingest_*` methods
    pub timebase: Timebase,
    /// Logging setup
    #[cfg(feature = "diagnostics")]
    pub logging: LogConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video: VideoWorkerConfig::default(),
            audio: AudioWorkerConfig::default(),
            clock_mode: ClockDriveMode::Auto,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            timebase: Timebase::MILLIS,
            #[cfg(feature = "diagnostics")]
            logging: LogConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> MediaResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|err| {
            MediaError::Core(PipelineError::InvalidConfiguration {
                field: "player".to_string(),
                reason: err.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> MediaResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| {
            MediaError::Core(PipelineError::InvalidData {
                reason: err.to_string(),
            })
        })
    }

    /// Check every section
    pub fn validate(&self) -> MediaResult<()> {
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be positive"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be positive"));
        }
        if self.timebase.den == 0 {
            return Err(invalid("timebase", "denominator must not be zero"));
        }
        self.video.validate()?;
        self.audio.validate()?;
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> MediaError {
    MediaError::Core(PipelineError::InvalidConfiguration {
        field: field.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PlayerConfig::from_json_str(
            r#"{ "clock_mode": "AudioDriven", "video": { "forced_fps": 30.0 } }"#,
        )
        .unwrap();
        assert_eq!(config.clock_mode, ClockDriveMode::AudioDriven);
        assert_eq!(config.video.forced_fps, 30.0);
        assert_eq!(config.video.slow_frames_abandon, 20);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PlayerConfig::from_json_str(r#"{ "queue_capacity": 0 }"#).is_err());
        assert!(PlayerConfig::from_json_str(r#"{ "video": { "poll_interval_ms": 0 } }"#).is_err());
        assert!(PlayerConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = PlayerConfig::default();
        let json = config.to_json_string().unwrap();
        assert_eq!(PlayerConfig::from_json_str(&json).unwrap(), config);
    }
}
