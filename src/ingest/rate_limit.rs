//! Sliding-window admission control for outbound requests
//!
//! Every HTTP attempt passes through [`RateLimiter::acquire`]. The limiter
//! keeps the admission instants of the current trailing window and only
//! admits a call while fewer than `limit` of them are younger than `window`.
//! A 429 from the server resets the window through
//! [`RateLimiter::notify_rate_limited`], deferring all admissions until the
//! server-specified delay has passed.

use crate::ingest::config::{DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW_SECS, DEFAULT_RETRY_AFTER_MS};
use crate::metrics::RateLimiterMetrics;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Admission log slots reserved up front; larger limits grow on demand.
const PREALLOCATED_SLOTS: usize = 1024;

/// Sliding-window rate limiter shared by concurrent fetchers.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    default_retry_after: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    /// No admission happens before this instant.
    window_start: Instant,
    /// Admission instants inside the trailing window, oldest first.
    issued: VecDeque<Instant>,
    total_admitted: u64,
    rate_limited: u64,
}

/// Point-in-time view of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    /// Configured calls per window.
    pub limit: u32,
    /// Calls admitted inside the current trailing window.
    pub in_window: u32,
    /// Calls admitted since creation.
    pub total_admitted: u64,
    /// 429 notifications received since creation.
    pub rate_limited: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            DEFAULT_RATE_LIMIT,
            Duration::from_secs_f64(DEFAULT_RATE_WINDOW_SECS),
        )
    }
}

impl RateLimiter {
    /// Create a limiter admitting at most `limit` calls per `window`.
    ///
    /// A zero limit is treated as one so `acquire` can always make progress.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            default_retry_after: Duration::from_millis(DEFAULT_RETRY_AFTER_MS),
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                issued: VecDeque::with_capacity((limit.max(1) as usize).min(PREALLOCATED_SLOTS)),
                total_admitted: 0,
                rate_limited: 0,
            }),
        }
    }

    /// Override the delay used when a 429 has no usable `Retry-After`.
    pub fn with_default_retry_after(mut self, delay: Duration) -> Self {
        self.default_retry_after = delay;
        self
    }

    /// Configured calls per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until one more call fits under the policy, then record it.
    pub async fn acquire(&self) {
        let mut metrics = RateLimiterMetrics::new();
        metrics.start_acquire();

        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                if now < state.window_start {
                    Some(state.window_start)
                } else {
                    while let Some(&oldest) = state.issued.front() {
                        if now.duration_since(oldest) >= self.window {
                            state.issued.pop_front();
                        } else {
                            break;
                        }
                    }

                    // Check before recording: admitting first and checking
                    // afterwards lets limit + 1 calls into one window.
                    if state.issued.len() >= self.limit as usize {
                        state.issued.front().map(|oldest| *oldest + self.window)
                    } else {
                        state.issued.push_back(now);
                        state.total_admitted += 1;
                        metrics.update_in_window(state.issued.len() as u32, self.limit);
                        None
                    }
                }
            };

            match wake_at {
                None => {
                    metrics.record_acquired();
                    return;
                }
                Some(deadline) => {
                    debug!(
                        wait_ms = deadline.saturating_duration_since(Instant::now()).as_millis(),
                        "Rate limit window full, waiting"
                    );
                    sleep_until(deadline).await;
                }
            }
        }
    }

    /// React to a 429: forget the current window and defer the next one.
    ///
    /// `retry_after` of `None` falls back to the configured default. A
    /// deferral already further in the future is kept. Returns the delay
    /// applied from now.
    pub async fn notify_rate_limited(&self, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after.unwrap_or(self.default_retry_after);
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.issued.clear();
        state.window_start = state.window_start.max(now + delay);
        state.rate_limited += 1;

        let applied = state.window_start.saturating_duration_since(now);
        warn!(
            retry_after_ms = delay.as_millis(),
            deferred_ms = applied.as_millis(),
            "Server signalled rate limit, window reset"
        );
        applied
    }

    /// Current counters.
    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        let now = Instant::now();
        let in_window = state
            .issued
            .iter()
            .filter(|at| now.duration_since(**at) < self.window)
            .count();
        RateLimiterStats {
            limit: self.limit,
            in_window: in_window as u32,
            total_admitted: state.total_admitted,
            rate_limited: state.rate_limited,
        }
    }
}

/// How rate-limit budgets are shared between partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScopeKind {
    /// One budget for the whole run.
    #[default]
    Global,
    /// Each partition gets its own budget.
    Partition,
}

/// Resolves the limiter a partition's requests go through.
#[derive(Debug)]
pub enum LimiterScope {
    /// Every partition shares one limiter.
    Global(Arc<RateLimiter>),
    /// Limiters are created lazily per partition id.
    PerPartition {
        /// Calls per window for each partition.
        limit: u32,
        /// Window length.
        window: Duration,
        /// Fallback delay for 429 without `Retry-After`.
        default_retry_after: Duration,
        /// Limiters created so far.
        limiters: std::sync::Mutex<HashMap<String, Arc<RateLimiter>>>,
    },
}

impl LimiterScope {
    /// Build a scope from configuration values.
    pub fn new(
        kind: LimiterScopeKind,
        limit: u32,
        window: Duration,
        default_retry_after: Duration,
    ) -> Self {
        match kind {
            LimiterScopeKind::Global => Self::Global(Arc::new(
                RateLimiter::new(limit, window).with_default_retry_after(default_retry_after),
            )),
            LimiterScopeKind::Partition => Self::PerPartition {
                limit,
                window,
                default_retry_after,
                limiters: std::sync::Mutex::new(HashMap::new()),
            },
        }
    }

    /// Limiter for `partition_id`.
    pub fn limiter_for(&self, partition_id: &str) -> Arc<RateLimiter> {
        match self {
            Self::Global(limiter) => limiter.clone(),
            Self::PerPartition {
                limit,
                window,
                default_retry_after,
                limiters,
            } => {
                let mut limiters = limiters.lock().unwrap_or_else(|p| p.into_inner());
                limiters
                    .entry(partition_id.to_string())
                    .or_insert_with(|| {
                        Arc::new(
                            RateLimiter::new(*limit, *window)
                                .with_default_retry_after(*default_retry_after),
                        )
                    })
                    .clone()
            }
        }
    }
}

impl From<Arc<RateLimiter>> for LimiterScope {
    fn from(limiter: Arc<RateLimiter>) -> Self {
        Self::Global(limiter)
    }
}
