//! Stream configuration.

use crate::error::Result;
use serde::Deserialize;

/// Bounds for event retention and delivery.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Max events retained per process log.
    /// Default: 10_000
    pub log_max_events: usize,

    /// Max payload bytes retained per process log.
    /// Default: 8MB
    pub log_max_bytes: usize,

    /// Max queued live events per subscription before it is dropped.
    /// Default: 1000
    pub subscriber_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            log_max_events: 10_000,
            log_max_bytes: 8 * 1024 * 1024, // 8MB
            subscriber_buffer: 1000,
        }
    }
}

impl StreamConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(json)?.clamped())
    }

    /// Raise every bound to at least 1.
    pub fn clamped(self) -> Self {
        Self {
            log_max_events: self.log_max_events.max(1),
            log_max_bytes: self.log_max_bytes.max(1),
            subscriber_buffer: self.subscriber_buffer.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_partial() {
        let config = StreamConfig::from_json(r#"{"log_max_events": 50}"#).unwrap();
        assert_eq!(config.log_max_events, 50);
        assert_eq!(config.subscriber_buffer, 1000);
    }

    #[test]
    fn test_zero_bounds_clamped() {
        let config =
            StreamConfig::from_json(r#"{"log_max_events": 0, "subscriber_buffer": 0}"#).unwrap();
        assert_eq!(config.log_max_events, 1);
        assert_eq!(config.subscriber_buffer, 1);
    }

    #[test]
    fn test_bad_json() {
        assert!(StreamConfig::from_json("{").is_err());
    }
}
