//! Retry policy for node executors.
//!
//! A policy decides how many times a node is attempted and how long the node's
//! own task sleeps between attempts. Sleeping never blocks sibling nodes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times to attempt a node and how long to wait in between.
///
/// The wait after attempt `n` is
/// `min(max_delay, initial_delay * backoff_multiplier^(n-1))`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    #[serde(rename = "initialDelayMs", with = "crate::millis")]
    pub initial_delay: Duration,
    /// Ceiling on any single wait.
    #[serde(rename = "maxDelayMs", with = "crate::millis")]
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    };

    /// Three attempts starting at one second, doubling, capped at 30 seconds.
    pub const STANDARD: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    /// Creates a policy with exponential backoff.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Number of attempts to make; never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns the wait after the given (1-based) attempt failed.
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self
            .backoff_multiplier
            .powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let nanos = (self.initial_delay.as_nanos() as f64 * factor).round();

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}
