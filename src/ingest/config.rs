//! Pipeline defaults and retry backoff policy

use std::time::Duration;

/// Default number of attempts per page, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubles on every further attempt.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Ceiling for a single backoff sleep.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Wait applied when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_MS: u64 = 2000;

/// Requests admitted per window when nothing is configured.
pub const DEFAULT_RATE_LIMIT: u32 = 30;

/// Default rate-limit window.
pub const DEFAULT_RATE_WINDOW_SECS: f64 = 60.0;

/// Records buffered before an automatic commit.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Items requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound on partitions processed at once.
pub const MAX_CONCURRENCY: usize = 32;

/// Upper bound on the configured calls per window.
pub const MAX_RATE_LIMIT: u32 = 100_000;

/// Bounded exponential retry policy for page fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per page, 429 responses included.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_count` (0-based): base * 2^n, capped.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
