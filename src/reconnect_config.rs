use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Reconnection policy of a [`ReconnectingFactory`].
///
/// The delay before the first retry is `initial_delay`, each following retry multiplies the
/// previous delay by `factor`, never going past `max_delay`.
///
/// Messages published while disconnected are kept until the connection is ready again,
/// without limit unless `max_queued_messages` is set.
///
/// When deserialized, delays are expressed in (fractional) seconds.
///
/// [`ReconnectingFactory`]: ./struct.ReconnectingFactory.html
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    #[serde(deserialize_with = "seconds")]
    pub(crate) initial_delay: Duration,
    #[serde(deserialize_with = "seconds")]
    pub(crate) max_delay: Duration,
    pub(crate) factor: f64,
    pub(crate) max_retries: Option<u32>,
    pub(crate) max_queued_messages: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
            max_retries: None,
            max_queued_messages: None,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Factors below 1 would make the delay shrink and are treated as 1.
    #[must_use]
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Stop reconnecting after this many consecutive failed attempts.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Refuse to publish while disconnected once this many messages wait.
    #[must_use]
    pub fn with_max_queued_messages(mut self, max_queued_messages: usize) -> Self {
        self.max_queued_messages = Some(max_queued_messages);
        self
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay.max(self.initial_delay)
    }

    pub fn factor(&self) -> f64 {
        self.factor.max(1.0)
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn max_queued_messages(&self) -> Option<usize> {
        self.max_queued_messages
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_accessors() {
        let config = ReconnectConfig::default()
            .with_initial_delay(Duration::from_secs(5))
            .with_max_delay(Duration::from_secs(1))
            .with_factor(0.5);
        assert_eq!(config.max_delay(), Duration::from_secs(5));
        assert_eq!(config.factor(), 1.0);
    }

    #[test]
    fn deserialize_seconds() {
        let config: ReconnectConfig =
            serde_json::from_str(
                r#"{"initial_delay": 0.5, "max_delay": 30, "max_retries": 4, "max_queued_messages": 100}"#,
            )
            .unwrap();
        assert_eq!(config.initial_delay(), Duration::from_millis(500));
        assert_eq!(config.max_delay(), Duration::from_secs(30));
        assert_eq!(config.factor(), 2.0);
        assert_eq!(config.max_retries(), Some(4));
        assert_eq!(config.max_queued_messages(), Some(100));
    }

    #[test]
    fn reject_negative_delay() {
        let res = serde_json::from_str::<ReconnectConfig>(r#"{"initial_delay": -1}"#);
        assert!(res.is_err());
    }
}
