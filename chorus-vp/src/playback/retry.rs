//! Bounded exponential backoff with jitter
//!
//! Used for the initial connect (Connecting) and for reconnects after a
//! stall (Stalled). The first attempt runs immediately; attempt `n >= 2`
//! waits `base * factor^(n-2)`, capped at `max_delay_ms`, then jittered by
//! up to ±25%.

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub base_delay_ms: u64,
    /// Multiplier for each subsequent wait
    pub backoff_factor: f64,
    /// Cap on any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Randomize each delay by ±25%
    pub jitter: bool,
}

/// Partial retry table; absent keys keep the base policy's values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
}

impl RetryOverrides {
    pub fn apply(self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_delay_ms: self.base_delay_ms.unwrap_or(base.base_delay_ms),
            backoff_factor: self.backoff_factor.unwrap_or(base.backoff_factor),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            jitter: self.jitter.unwrap_or(base.jitter),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before attempt `attempt` (1-indexed)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(i32::MAX as u32) as i32;
        let delay_ms = (self.base_delay_ms as f64 * self.backoff_factor.powi(exp))
            .min(self.max_delay_ms as f64)
            .max(0.0) as u64;

        let delay_ms = if self.jitter && delay_ms >= 4 {
            let spread = delay_ms / 4;
            rand::thread_rng().gen_range(delay_ms - spread..=delay_ms + spread)
        } else {
            delay_ms
        };
        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt is allowed after `attempts_made`
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry max_attempts must be > 0".to_string()));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(Error::Config("retry backoff_factor must be >= 1.0".to_string()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config("retry max_delay_ms must be >= base_delay_ms".to_string()));
        }
        Ok(())
    }
}

/// Attempt counter shared across consecutive failures
///
/// The owner resets it only after a frame has been sent successfully.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    used: u32,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, used: 0 }
    }

    /// Claim the next attempt; returns its 1-indexed number and the delay to
    /// wait first, or `None` once exhausted
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if !self.policy.should_retry(self.used) {
            return None;
        }
        self.used += 1;
        Some((self.used, self.policy.delay_before(self.used)))
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}
