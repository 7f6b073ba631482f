//! Bounded linear backoff
//!
//! Shared by the connect and publish loops. The interval is fixed between
//! attempts and no pause follows the final attempt, so a phase costs at most
//! `(limit - 1) × interval` of sleeping.

use std::time::Duration;

/// Attempt limit plus fixed pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    limit: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self { limit, interval }
    }

    /// Maximum number of attempts (0 means none are made)
    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Zero-based attempt indices allowed by this policy
    pub fn attempts(&self) -> std::ops::Range<u32> {
        0..self.limit
    }

    /// True when `attempt` (zero-based) is the last one permitted
    pub fn is_final(&self, attempt: u32) -> bool {
        attempt + 1 >= self.limit
    }

    /// Sleep for the interval unless `attempt` was the final one.
    ///
    /// Returns whether a pause happened.
    pub async fn pause_after(&self, attempt: u32) -> bool {
        if self.is_final(attempt) || self.interval.is_zero() {
            return false;
        }

        tokio::time::sleep(self.interval).await;
        true
    }
}
