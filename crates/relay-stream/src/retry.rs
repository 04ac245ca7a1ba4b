use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential retry policy for establishing a stream connection.
///
/// Only the initial connection is retried. Once bytes have started flowing a
/// failure is terminal for the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first connection attempt.
    #[serde(default)]
    pub max_retries: u32,
    /// Backoff before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Exponential multiplier per retry step.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for computed backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    /// Retries without sleeping between attempts.
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            backoff_factor: 1.0,
            max_backoff_ms: 0,
        }
    }

    pub fn exponential(max_retries: u32, initial_backoff_ms: u64, backoff_factor: f64) -> Self {
        let factor = if backoff_factor <= 0.0 {
            default_backoff_factor()
        } else {
            backoff_factor
        };
        Self {
            max_retries,
            initial_backoff_ms,
            backoff_factor: factor,
            max_backoff_ms: default_max_backoff_ms().max(initial_backoff_ms),
        }
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    pub fn can_retry(&self, attempts_used: u32) -> bool {
        attempts_used < self.max_retries
    }

    /// Total connection attempts allowed, including the first one.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn backoff_duration(&self, attempts_used: u32) -> Duration {
        if self.max_retries == 0 || self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(attempts_used as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round() as u64;
        Duration::from_millis(base.min(self.max_backoff_ms))
    }
}
