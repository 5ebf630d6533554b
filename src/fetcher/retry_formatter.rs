//! Classification and log formatting for failed fetch attempts.
//!
//! Every failed attempt is mapped to a [`RetryErrorType`], which decides
//! whether the retry loop may try again and what the operator is told when
//! it gives up.

use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

use crate::DateRange;

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure or similar
    NetworkOffline,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    ServerError(u16),
    /// HTTP 401/403
    AuthFailed(u16),
    /// Any other non-success status
    ClientError(u16),
    /// Anything else on the transport
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside log lines.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "request timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limited (429)",
            Self::ServerError(code) => match code {
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(_) => "not authorized",
            Self::ClientError(code) => match code {
                400 => "bad request",
                404 => "not found",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// What the operator can do about it.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Increase api.request_timeout_secs or check upstream latency",
            Self::NetworkOffline => "Verify connectivity and DNS resolution for api.base_url",
            Self::RateLimit => "Lower rate_limit.max_requests or widen rate_limit.window_secs",
            Self::ServerError(_) => "Upstream is unhealthy; resume the partition later",
            Self::AuthFailed(_) => "Check credentials configured in api.extra_params",
            Self::ClientError(_) => "Check the partition's source and date range parameters",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthFailed(_) | Self::ClientError(_))
    }
}

/// Context describing one failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that failed (1-based)
    pub attempt: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Classification
    pub error_type: RetryErrorType,
    /// Wait before the next attempt
    pub backoff_duration: Duration,
    /// Partition being fetched
    pub partition_id: String,
    /// Cursor of the page being fetched
    pub cursor: String,
    /// Dates covered by the partition
    pub date_range: Option<DateRange>,
    /// Raw error text
    pub error_message: String,
    /// URL requested
    pub endpoint: String,
}

impl RetryContext {
    /// Context for `attempt` of `max_attempts`; fill the rest with the `with_*` setters.
    pub fn new(attempt: u32, max_attempts: u32, error_type: RetryErrorType) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration: Duration::ZERO,
            partition_id: String::new(),
            cursor: String::new(),
            date_range: None,
            error_message: String::new(),
            endpoint: String::new(),
        }
    }

    /// Set the partition and cursor.
    pub fn with_partition(
        mut self,
        partition_id: impl Into<String>,
        cursor: impl Into<String>,
        date_range: Option<DateRange>,
    ) -> Self {
        self.partition_id = partition_id.into();
        self.cursor = cursor.into();
        self.date_range = date_range;
        self
    }

    /// Set the wait before the next attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_duration = backoff;
        self
    }

    /// Set the error text and URL.
    pub fn with_error(mut self, message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.error_message = message.into();
        self.endpoint = endpoint.into();
        self
    }

    /// One-line retry notice.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds [{}]",
            self.attempt + 1,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.location(),
        )
    }

    /// Multi-line summary once the budget is spent.
    pub fn format_failure(&self) -> String {
        let range = self
            .date_range
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        [
            format!("[FAILED] Page fetch failed after {} attempts", self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Partition: {}", display_or_unknown(&self.partition_id)),
            format!("  Cursor: {}", display_or_unknown(&self.cursor)),
            format!("  Date range: {range}"),
            format!("  Endpoint: {}", self.endpoint),
            format!("  Suggestion: {}", self.error_type.suggestion()),
        ]
        .join("\n")
    }

    fn location(&self) -> String {
        match (self.partition_id.is_empty(), self.cursor.is_empty()) {
            (false, false) => format!("{} @ {}", self.partition_id, self.cursor),
            (false, true) => self.partition_id.clone(),
            _ => self.endpoint.clone(),
        }
    }
}

fn display_or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}

/// Classify a failed attempt from its status or transport error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        let code = status.as_u16();
        if code == 429 {
            return RetryErrorType::RateLimit;
        }
        if code == 401 || code == 403 {
            return RetryErrorType::AuthFailed(code);
        }
        if status.is_server_error() {
            return RetryErrorType::ServerError(code);
        }
        if !status.is_success() {
            return RetryErrorType::ClientError(code);
        }
    }

    match err {
        Some(err) if err.is_timeout() => RetryErrorType::NetworkTimeout,
        Some(err) if err.is_connect() => RetryErrorType::NetworkOffline,
        _ => RetryErrorType::NetworkGeneric,
    }
}
