//! # Record Ingest Library
//!
//! Pulls paginated records from a rate-limited HTTP API, deduplicates them by
//! content identity and persists them into SQLite so that repeated or
//! interrupted runs converge on the same record set.
//!
//! ## Features
//!
//! - **Admission Control**: sliding-window rate limiter honouring `Retry-After`
//! - **Bounded Retries**: exponential backoff for timeouts and 5xx, typed errors on exhaustion
//! - **Content Identity**: SHA-256 over normalized payloads, enforced by a unique constraint
//! - **Batched Commits**: per-record duplicate tolerance, never a wholesale rollback
//! - **Resumable Partitions**: cursor and counts persisted alongside committed data
//!
//! ## Quick Start
//!
//! ```no_run
//! use record_ingest::config::IngestConfig;
//! use record_ingest::ingest::Orchestrator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::load("ingest.json".as_ref())?;
//! let orchestrator = Orchestrator::from_config(&config).await?;
//! let report = orchestrator.run(&config.partitions).await;
//! println!("{} partitions failed", report.failed_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`ingest`] - rate limiter, partition state and the orchestrator loop
//! - [`fetcher`] - HTTP page fetching with retry and response parsing
//! - [`dedup`] - payload normalization and content hashing
//! - [`store`] - SQLite persistence, batch writer and writer lock
//! - [`config`] - typed configuration loaded once at startup

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Typed run configuration
pub mod config;

/// Content hashing and in-run deduplication
pub mod dedup;

/// Page fetchers
pub mod fetcher;

/// Ingestion orchestration
pub mod ingest;

/// Observability metrics
pub mod metrics;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Durable storage
pub mod store;

pub use dedup::{Classification, Deduplicator};
pub use ingest::{Orchestrator, PartitionReport, RunReport};

/// A single item fetched from upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    /// Partition the record was fetched for
    pub partition_id: String,
    /// Upstream identifier, informational only
    pub external_id: Option<String>,
    /// Hex SHA-256 of the normalized content; the record's identity
    pub content_hash: String,
    /// Raw item as returned by upstream (JSON text)
    pub payload: String,
    /// When the page containing the record was received
    pub fetched_at: DateTime<Utc>,
}

impl Record {
    /// Build a record, hashing `content` for its identity.
    ///
    /// `content` is what identifies the record (a text field or the whole
    /// item); `payload` is what gets stored.
    pub fn new(
        partition_id: impl Into<String>,
        external_id: Option<String>,
        content: &str,
        payload: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            external_id,
            content_hash: dedup::content_hash(content),
            payload: payload.into(),
            fetched_at,
        }
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DateRange {
    /// First day
    pub start: NaiveDate,
    /// Last day, inclusive
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range; fails when `end` precedes `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Single-day range.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Validate ordering
    pub fn validate(&self) -> Result<(), String> {
        if self.end < self.start {
            return Err(format!(
                "date range end {} precedes start {}",
                self.end, self.start
            ));
        }
        Ok(())
    }

    /// Number of days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Iterate the days of the range in order.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.days().max(0)).map(move |offset| start + Duration::days(offset))
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

/// One independently resumable unit of work: a source over a date range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionSpec {
    /// Stable identifier; progress is keyed by it
    #[serde(default)]
    pub id: String,
    /// Upstream source (sent as the source query parameter)
    pub source: String,
    /// Dates covered
    pub date_range: DateRange,
    /// Pages to fetch before the partition is marked completed.
    ///
    /// Counted per run, but reaching it completes the partition, so later
    /// runs skip it unless forced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

impl PartitionSpec {
    /// Create a partition with the default id `source:range`.
    pub fn new(source: impl Into<String>, date_range: DateRange) -> Self {
        let source = source.into();
        Self {
            id: default_partition_id(&source, &date_range),
            source,
            date_range,
            max_pages: None,
        }
    }

    /// Override the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Complete the partition after `max_pages` pages.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Fill in the default id when none was given.
    pub fn ensure_id(&mut self) {
        if self.id.trim().is_empty() {
            self.id = default_partition_id(&self.source, &self.date_range);
        }
    }

    /// Validate partition fields
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("partition id cannot be empty".to_string());
        }
        if self.source.trim().is_empty() {
            return Err(format!("partition {}: source cannot be empty", self.id));
        }
        if self.max_pages == Some(0) {
            return Err(format!("partition {}: max_pages must be positive", self.id));
        }
        self.date_range
            .validate()
            .map_err(|e| format!("partition {}: {e}", self.id))
    }
}

fn default_partition_id(source: &str, range: &DateRange) -> String {
    format!("{source}:{range}")
}

/// Expand sources and a date range into one partition per source per day.
///
/// Output is ordered by source first, then by date.
pub fn expand_daily_partitions(sources: &[String], range: DateRange) -> Vec<PartitionSpec> {
    sources
        .iter()
        .flat_map(|source| {
            range
                .iter_days()
                .map(move |day| PartitionSpec::new(source.clone(), DateRange::day(day)))
        })
        .collect()
}
