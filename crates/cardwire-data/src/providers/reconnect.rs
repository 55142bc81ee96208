use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection policy for streaming providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect after the stream drops.
    pub enabled: bool,
    /// Wait before the first attempt.
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound for the backoff.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub backoff_multiplier: f32,
    /// Attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_attempts: Some(5),
        }
    }
}

impl ReconnectConfig {
    /// Never reconnect.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff before reconnect attempt `attempt` (0-based), capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let factor = f64::from(self.backoff_multiplier).powi(attempt.min(20) as i32);
        let scaled = self.initial_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Whether attempt `attempt` (0-based) is still allowed.
    #[must_use]
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| attempt < max)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_attempt_cap() {
        let config = ReconnectConfig::default();
        assert!(config.should_reconnect(4));
        assert!(!config.should_reconnect(5));
        let unlimited = ReconnectConfig {
            max_attempts: None,
            ..ReconnectConfig::default()
        };
        assert!(unlimited.should_reconnect(1000));
    }

    #[test]
    fn test_disabled() {
        let config = ReconnectConfig::disabled();
        assert!(!config.should_reconnect(0));
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_deserialize_millis() {
        let config: ReconnectConfig =
            serde_json::from_str(r#"{"initial_delay": 250, "max_attempts": 2}"#).expect("valid");
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_attempts, Some(2));
        assert!(config.enabled);
    }
}
