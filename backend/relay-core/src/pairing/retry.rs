//! Backoff schedule shared by the pairing loop and the page provider.

use std::time::Duration;

use backoff::backoff::Backoff;

pub const RETRY_BASE: Duration = Duration::from_millis(500);
pub const RETRY_CAP: Duration = Duration::from_secs(30);

/// Delay before the next attempt after `retries` consecutive failures.
///
/// 500 ms doubling per retry, capped at 30 s. Monotonically non-decreasing.
pub fn retry_timeout(retries: u32) -> Duration {
    let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
    let millis = (RETRY_BASE.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(millis).min(RETRY_CAP)
}

/// [`retry_timeout`] as a [`Backoff`], for loops written against `next_backoff()`.
///
/// Never gives up.
#[derive(Debug, Clone, Default)]
pub struct RetrySchedule {
    retries: u32,
}

impl RetrySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl Backoff for RetrySchedule {
    fn reset(&mut self) {
        self.retries = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.retries = self.retries.saturating_add(1);
        Some(retry_timeout(self.retries))
    }
}
