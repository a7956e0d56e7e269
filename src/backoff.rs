use crate::reconnect_config::ReconnectConfig;
use std::time::Duration;

/// Retry pacing state owned by a [`ReconnectingFactory`].
///
/// [`ReconnectingFactory`]: ./struct.ReconnectingFactory.html
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt_count: u32,
    current_delay: Duration,
}

impl Backoff {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay();
        Self {
            config,
            attempt_count: 0,
            current_delay,
        }
    }

    /// Failed attempts since the last time the connection was ready.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.config.max_delay()
    }

    /// Record a failed attempt and get the delay to wait before the next one.
    ///
    /// Returns `None` once `max_retries` consecutive failures have been recorded.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_retries()
            .is_some_and(|max_retries| self.attempt_count >= max_retries)
        {
            return None;
        }
        self.attempt_count += 1;
        self.current_delay = if self.attempt_count == 1 {
            self.config.initial_delay()
        } else {
            let max_delay = self.config.max_delay();
            // Past what a Duration can hold, the cap applies
            Duration::try_from_secs_f64(self.current_delay.as_secs_f64() * self.config.factor())
                .map_or(max_delay, |delay| delay.min(max_delay))
        };
        Some(self.current_delay)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt_count = 0;
        self.current_delay = self.config.initial_delay();
    }
}
