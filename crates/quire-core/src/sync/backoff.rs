//! Bounded exponential backoff for automatic retries

use std::time::Duration;

use crate::config::Config;

/// Retry delays: `initial`, doubling, capped at `max`, at most `max_attempts`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.retry_initial(),
            config.retry_max(),
            config.retry_max_attempts,
        )
    }

    /// Delay before the next retry, or `None` once attempts are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempts);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }
}
