//! Production observability metrics for the ingestion pipeline
//!
//! This module records request outcomes, 429 pressure, retry backoff,
//! rate-limiter waits, batch commits and partition outcomes.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate facade; without an installed recorder every call is a no-op
//! - Prometheus exporter for the scrape endpoint, opt-in via `--metrics-addr`
//! - Idempotent initialization

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed (port in use, recorder already set)
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Initialize metrics system with Prometheus exporter
///
/// Call once at startup; later calls are no-ops.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.lock().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made upstream"
    );
    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Total number of 429 rate limit responses received"
    );
    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_histogram!(
        "rate_limit_queue_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for rate limiter admission"
    );
    describe_gauge!(
        "rate_limit_window_used_ratio",
        Unit::Count,
        "Fraction of the current window's budget already used"
    );
    describe_counter!(
        "batch_commits_total",
        Unit::Count,
        "Storage transactions committed"
    );
    describe_counter!(
        "records_persisted_total",
        Unit::Count,
        "Records inserted by batch commits"
    );
    describe_counter!(
        "records_duplicate_total",
        Unit::Count,
        "Records skipped because their content hash already existed"
    );
    describe_histogram!(
        "batch_commit_size",
        Unit::Count,
        "Records per committed batch"
    );
    describe_counter!(
        "partitions_completed_total",
        Unit::Count,
        "Partitions that reached Completed"
    );
    describe_counter!(
        "partitions_failed_total",
        Unit::Count,
        "Partitions that ended Failed"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Record an HTTP request with timing
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            start_time: Instant::now(),
            correlation_id: generate_correlation_id(),
            attempt,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!(
                "http_429_errors_total",
                "endpoint" => self.endpoint.clone(),
            )
            .increment(1);
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a transport error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("http_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());
}

/// Rate limiter metrics helper
#[derive(Debug, Default)]
pub struct RateLimiterMetrics {
    start_time: Option<Instant>,
}

impl RateLimiterMetrics {
    /// Create a new rate limiter metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Start measuring queue wait time
    pub fn start_acquire(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Record admission
    pub fn record_acquired(&mut self) {
        if let Some(start) = self.start_time.take() {
            let wait = start.elapsed();
            histogram!("rate_limit_queue_wait_seconds").record(wait.as_secs_f64());
            if wait.as_millis() > 100 {
                debug!(wait_ms = wait.as_millis(), "Admitted after waiting");
            }
        }
    }

    /// Update how much of the window is in use
    pub fn update_in_window(&self, in_window: u32, limit: u32) {
        gauge!("rate_limit_window_used_ratio").set(in_window as f64 / limit.max(1) as f64);
    }
}

/// Record one committed batch
pub fn record_batch_commit(size: usize, inserted: u64, duplicates: u64) {
    counter!("batch_commits_total").increment(1);
    counter!("records_persisted_total").increment(inserted);
    counter!("records_duplicate_total").increment(duplicates);
    histogram!("batch_commit_size").record(size as f64);
}

/// Partition outcome metrics
pub struct PartitionMetrics {
    partition_id: String,
    start_time: Instant,
}

impl PartitionMetrics {
    /// Start tracking a partition
    pub fn start(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            start_time: Instant::now(),
        }
    }

    /// Record partition completion
    pub fn record_success(&self, new_records: u64) {
        counter!("partitions_completed_total").increment(1);
        info!(
            partition_id = %self.partition_id,
            new_records = new_records,
            duration_secs = self.start_time.elapsed().as_secs_f64(),
            "Partition completed"
        );
    }

    /// Record partition failure
    pub fn record_failure(&self, error: &str) {
        counter!("partitions_failed_total").increment(1);
        error!(
            partition_id = %self.partition_id,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs_f64(),
            "Partition failed"
        );
    }
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.lock().await
}
