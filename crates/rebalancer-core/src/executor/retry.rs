//! Retry policy for action dispatch

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff for failed action dispatches. A dispatch
/// timeout counts as a failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per action, including the first. Once exhausted the
    /// action is terminally failed.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries: one attempt, terminal on failure.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `completed_attempts` failures.
    pub fn backoff_after(&self, completed_attempts: u32) -> Duration {
        let exponent = completed_attempts.saturating_sub(1);
        let factor = self.multiplier.powi(exponent as i32);
        let delay = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}
