//! Reconnect backoff policy.

use rand::Rng;
use std::time::Duration;

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Ceiling applied before jitter.
    pub max_delay: Duration,
    /// Jitter fraction in `[0, 1]`; each delay is scaled by
    /// `1 + U[0, max_jitter]`.
    pub max_jitter: f64,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_jitter: 0.1,
            max_attempts: None,
        }
    }
}

/// Produces the delay sequence
/// `min(base * multiplier^(n-1), max) * (1 + U[0, max_jitter])`.
#[derive(Debug)]
pub struct Reconnector {
    config: ReconnectConfig,
    attempt: u32,
    active: bool,
}

impl Reconnector {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            active: false,
        }
    }

    /// Delay before the next attempt, or `None` when attempts are
    /// exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        self.attempt += 1;
        self.active = true;

        let exp = self.config.base_delay.as_secs_f64()
            * self.config.multiplier.powi(self.attempt as i32 - 1);
        let capped = exp.min(self.config.max_delay.as_secs_f64());
        let jitter = if self.config.max_jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.config.max_jitter)
        } else {
            0.0
        };
        Some(Duration::from_secs_f64(capped * (1.0 + jitter)))
    }

    /// Attempts issued since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether a reconnect cycle is in progress.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Clear the cycle after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.active = false;
    }
}
