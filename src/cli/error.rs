//! CLI error types and conversions

use crate::config::ConfigError;
use crate::ingest::IngestError;
use crate::metrics::MetricsError;
use crate::store::StoreError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Ingestion setup error
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Run finished with failed or interrupted partitions
    #[error("run incomplete: {failed} partition(s) failed, interrupted: {interrupted}")]
    RunIncomplete {
        /// Partitions that ended Failed
        failed: usize,
        /// Whether shutdown cut the run short
        interrupted: bool,
    },
}
