//! Exponential backoff with jitter for coordinator retries.

use std::time::Duration;

use rand::Rng;

/// Retry schedule for transport and availability failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    /// Fraction of each delay added or removed at random, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

/// Tracks consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget past failures after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The delay before the next retry, without jitter.
    pub fn base_delay(&self) -> Duration {
        let factor = self
            .config
            .multiplier
            .max(1.0)
            .powi(self.attempt.min(64) as i32);
        Duration::try_from_secs_f64(self.config.initial.as_secs_f64() * factor)
            .ok()
            .filter(|delay| *delay < self.config.max)
            .unwrap_or(self.config.max)
    }

    /// Records a failure and returns how long to wait.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return base;
        }
        let scale = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(scale)
    }
}
