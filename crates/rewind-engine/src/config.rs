//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Message shown to viewers when an action fails to play.
pub const DEFAULT_FAILURE_MESSAGE: &str =
    "An error occurred while playing your replay. Please contact an administrator for support.";

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Why a [`SessionConfig`] was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be positive")]
    ZeroInterval { field: &'static str },

    #[error("initial_speed must be finite and non-negative, got {speed}")]
    InvalidSpeed { speed: f64 },

    #[error("malformed session config: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for a replay session.
///
/// Every field has a default, so a JSON document only needs to name the
/// fields it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Period of the tick loop. Defaults to one world step at 20 steps per
    /// second.
    pub tick_interval: Duration,
    /// Period of the status display refresh.
    pub status_interval: Duration,
    /// How far [`step_forward`](crate::session::ReplaySession::step_forward)
    /// and [`step_backward`](crate::session::ReplaySession::step_backward)
    /// move replay time.
    pub step_duration: Duration,
    /// Playback speed a new session starts with.
    pub initial_speed: f64,
    /// Text sent to every viewer when playback fails.
    pub failure_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            status_interval: Duration::from_secs(2),
            step_duration: Duration::from_secs(10),
            initial_speed: 1.0,
            failure_message: DEFAULT_FAILURE_MESSAGE.to_owned(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a configuration from JSON, filling missing fields
    /// with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration, reporting the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroInterval {
                field: "tick_interval",
            });
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::ZeroInterval {
                field: "status_interval",
            });
        }
        if !(self.initial_speed.is_finite() && self.initial_speed >= 0.0) {
            return Err(ConfigError::InvalidSpeed {
                speed: self.initial_speed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ticks_once_per_world_step() {
        let config = SessionConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.status_interval, Duration::from_secs(2));
        assert_eq!(config.step_duration, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{"initial_speed": 2.0, "tick_interval": {"secs": 0, "nanos": 10000000}}"#,
        )
        .unwrap();
        assert_eq!(config.initial_speed, 2.0);
        assert_eq!(config.tick_interval, Duration::from_millis(10));
        assert_eq!(config.failure_message, DEFAULT_FAILURE_MESSAGE);
    }

    #[test]
    fn zero_tick_interval_is_invalid() {
        let config = SessionConfig {
            tick_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroInterval {
                field: "tick_interval"
            })
        ));
    }

    #[test]
    fn negative_speed_is_invalid() {
        let config = SessionConfig {
            initial_speed: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSpeed { .. })
        ));

        let config = SessionConfig {
            initial_speed: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_is_validated_on_load() {
        let zero = SessionConfig::from_json_str(r#"{"tick_interval": {"secs": 0, "nanos": 0}}"#);
        assert!(matches!(
            zero,
            Err(ConfigError::ZeroInterval {
                field: "tick_interval"
            })
        ));

        let broken = SessionConfig::from_json_str(r#"{"initial_speed": "fast"}"#);
        assert!(matches!(broken, Err(ConfigError::Json(_))));
    }
}
