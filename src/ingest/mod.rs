//! Ingestion orchestration and admission control
//!
//! This module drives the fetch → dedupe → persist loop for each partition.
//!
//! # Overview
//!
//! 1. **Partitions**: work is described by [`crate::PartitionSpec`] values
//! 2. **Progress**: each partition's cursor and counts live in [`partition::PartitionProgress`]
//! 3. **Rate Limiting**: every request is admitted by [`rate_limit::RateLimiter`]
//! 4. **Execution**: [`orchestrator::Orchestrator`] runs partitions through a bounded pool
//! 5. **Reporting**: results come back as a [`report::RunReport`]
//!
//! # Error Handling
//!
//! Errors are contained per partition:
//! - Retryable network errors and 429s are absorbed by the fetcher's retry budget
//! - A fatal response on a page-numbered partition skips that page
//! - Exhausted retries and storage failures mark the partition `Failed`,
//!   keeping its last durable cursor; other partitions carry on
//!
//! # Components
//!
//! - [`orchestrator`] - per-partition loop and worker pool
//! - [`partition`] - status, counters and durable progress
//! - [`rate_limit`] - sliding-window limiter and its sharing scope
//! - [`report`] - run and partition summaries
//! - [`config`] - defaults and backoff calculation

pub mod config;
pub mod orchestrator;
pub mod partition;
pub mod rate_limit;
pub mod report;

pub use orchestrator::Orchestrator;
pub use partition::{PartitionCounts, PartitionProgress, PartitionStatus};
pub use rate_limit::RateLimiter;
pub use report::{PartitionReport, RunReport};

use crate::config::ConfigError;
use crate::fetcher::FetcherError;
use crate::store::StoreError;

/// Ingestion errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Page fetch failed
    #[error(transparent)]
    Fetch(#[from] FetcherError),

    /// Storage failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Lifecycle violation
    #[error("partition {partition_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Partition id
        partition_id: String,
        /// Current status
        from: PartitionStatus,
        /// Requested status
        to: PartitionStatus,
    },
}
