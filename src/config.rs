//! Typed run configuration
//!
//! An [`IngestConfig`] is read once from a JSON file (every field has a
//! default) and then adjusted by command-line overrides. It is not mutated
//! after the run starts.

use crate::ingest::config::{
    RetryPolicy, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_PAGE_SIZE, DEFAULT_RATE_LIMIT,
    DEFAULT_RATE_WINDOW_SECS, DEFAULT_RETRY_AFTER_MS, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
    MAX_CONCURRENCY, MAX_RATE_LIMIT,
};
use crate::ingest::rate_limit::{LimiterScope, LimiterScopeKind};
use crate::PartitionSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid JSON for this schema
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// Values are inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How to talk to the upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Scheme and host, e.g. `https://api.example.org`
    pub base_url: String,
    /// Path appended to `base_url`
    pub endpoint: String,
    /// Items requested per page
    pub page_size: u32,
    /// Query parameter carrying the partition source
    pub source_param: String,
    /// Query parameter carrying the first day
    pub start_param: String,
    /// Query parameter carrying the last day
    pub end_param: String,
    /// Query parameter carrying the page number
    pub page_param: String,
    /// Query parameter carrying the page size
    pub limit_param: String,
    /// Query parameter carrying a continuation token
    pub cursor_param: String,
    /// `chrono` format for the date parameters
    pub date_format: String,
    /// Constant parameters sent with every request
    pub extra_params: BTreeMap<String, String>,
    /// Response field holding the item array
    pub items_field: String,
    /// Item field holding the upstream id
    pub id_field: String,
    /// Item field whose text is the record content; the whole item when unset
    pub content_field: Option<String>,
    /// Response field holding the total item count
    pub count_field: String,
    /// Response field holding a continuation token
    pub next_cursor_field: String,
    /// Response field holding an explicit has-more flag
    pub has_more_field: String,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            endpoint: "/".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            source_param: "source".to_string(),
            start_param: "start_date".to_string(),
            end_param: "end_date".to_string(),
            page_param: "page".to_string(),
            limit_param: "limit".to_string(),
            cursor_param: "cursor".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            extra_params: BTreeMap::new(),
            items_field: "items".to_string(),
            id_field: "id".to_string(),
            content_field: None,
            count_field: "count".to_string(),
            next_cursor_field: "next_cursor".to_string(),
            has_more_field: "has_more".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl ApiConfig {
    /// Full request URL without query string.
    pub fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let endpoint = self.endpoint.trim_start_matches('/');
        if endpoint.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/{endpoint}")
        }
    }
}

/// Admission policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls admitted per window
    pub max_requests: u32,
    /// Window length in seconds (fractions allowed)
    pub window_secs: f64,
    /// Delay used when a 429 carries no usable `Retry-After`
    pub default_retry_after_secs: f64,
    /// Whether partitions share one budget
    pub scope: LimiterScopeKind,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT,
            window_secs: DEFAULT_RATE_WINDOW_SECS,
            default_retry_after_secs: DEFAULT_RETRY_AFTER_MS as f64 / 1000.0,
            scope: LimiterScopeKind::Global,
        }
    }
}

impl RateLimitConfig {
    /// Build the limiter scope described by this config.
    pub fn build_scope(&self) -> LimiterScope {
        LimiterScope::new(
            self.scope,
            self.max_requests,
            Duration::from_secs_f64(self.window_secs),
            Duration::from_secs_f64(self.default_retry_after_secs),
        )
    }
}

/// Retry settings, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per page, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub base_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: INITIAL_BACKOFF_MS,
            max_delay_ms: MAX_BACKOFF_MS,
        }
    }
}

impl RetryConfig {
    /// Policy value used by the fetcher.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Everything a run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SQLite database file
    pub database: PathBuf,
    /// Upstream API
    pub api: ApiConfig,
    /// Admission policy
    pub rate_limit: RateLimitConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Records per commit
    pub batch_size: usize,
    /// Partitions processed at once
    pub concurrency: usize,
    /// Fatal page errors tolerated per partition and run; unset means no cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_skipped_pages: Option<u32>,
    /// Work to do
    pub partitions: Vec<PartitionSpec>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("ingest.db"),
            api: ApiConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: 1,
            max_skipped_pages: None,
            partitions: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Read a config file and fill in partition ids. Does not validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a config from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_str(text)?;
        for partition in &mut config.partitions {
            partition.ensure_id();
        }
        Ok(config)
    }

    /// Check the config for values a run cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.api.base_url.trim().is_empty() {
            return invalid("api.base_url is required".to_string());
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return invalid(format!(
                "api.base_url must start with http:// or https://, got '{}'",
                self.api.base_url
            ));
        }
        if self.api.page_size == 0 {
            return invalid("api.page_size must be positive".to_string());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".to_string());
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return invalid(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            ));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.max_requests > MAX_RATE_LIMIT {
            return invalid(format!(
                "rate_limit.max_requests must be between 1 and {MAX_RATE_LIMIT}, got {}",
                self.rate_limit.max_requests
            ));
        }
        if !(self.rate_limit.window_secs.is_finite() && self.rate_limit.window_secs > 0.0) {
            return invalid("rate_limit.window_secs must be a positive number".to_string());
        }
        if !(self.rate_limit.default_retry_after_secs.is_finite()
            && self.rate_limit.default_retry_after_secs >= 0.0)
        {
            return invalid("rate_limit.default_retry_after_secs must be non-negative".to_string());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid("retry.max_delay_ms must not be below retry.base_delay_ms".to_string());
        }

        let mut seen = HashSet::new();
        for partition in &self.partitions {
            partition.validate().map_err(ConfigError::Invalid)?;
            if !seen.insert(partition.id.as_str()) {
                return invalid(format!("duplicate partition id '{}'", partition.id));
            }
        }
        Ok(())
    }
}
