use crate::config::types::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff with a bounded number of attempts.
///
/// The first attempt is free; every failed attempt asks `next_delay` how long
/// to wait before trying again. `None` means the attempt budget is spent.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_attempts: u32,
    attempts: u32,
    current: Duration,
    max_backoff: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            attempts: 0,
            current: config.initial_backoff,
            max_backoff: config.max_backoff,
            jitter: false,
        }
    }

    /// Draw each delay uniformly from `[delay/2, delay]`
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Record a failed attempt and return the delay before the next one
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            return None;
        }

        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max_backoff);

        Some(if self.jitter { jittered(delay) } else { delay })
    }

    /// Failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self, config: &RetryConfig) {
        self.attempts = 0;
        self.current = config.initial_backoff;
    }
}

fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis < 2 {
        return delay;
    }
    Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
}
