//! Durable storage for records and partition progress
//!
//! - [`sqlite`] - schema, batch commits, progress table, run history
//! - [`batch`] - buffering writer that commits in bounded batches
//! - [`lock`] - single-writer lock file next to the database
//!
//! Records committed by a batch are handed to an optional [`RecordSink`]
//! for downstream processing.

use crate::Record;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod batch;
pub mod lock;
pub mod sqlite;

pub use batch::BatchWriter;
pub use lock::WriterLock;
pub use sqlite::{RunHistoryEntry, SqliteStore};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query or commit failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error around the database
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Another process holds the writer lock
    #[error("database is locked by another run: {0}")]
    Locked(String),

    /// Stored row could not be decoded
    #[error("corrupt progress row for partition {partition_id}: {reason}")]
    Corrupt {
        /// Partition whose row is unreadable
        partition_id: String,
        /// What was wrong
        reason: String,
    },
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of committing one batch.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Records inserted, in buffer order
    pub persisted: Vec<Record>,
    /// Records skipped because their content hash already existed
    pub duplicates: u64,
}

impl CommitOutcome {
    /// Number of records inserted.
    pub fn inserted(&self) -> u64 {
        self.persisted.len() as u64
    }

    /// Records in the batch, inserted or not.
    pub fn batch_size(&self) -> u64 {
        self.inserted() + self.duplicates
    }
}

/// Errors raised by downstream sinks
#[derive(Debug, thiserror::Error)]
#[error("record sink error: {0}")]
pub struct SinkError(pub String);

/// Downstream consumer of newly persisted records.
///
/// Called once per commit with the records that commit inserted. Failures
/// are logged by the caller and never undo the commit.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Receive records persisted by one commit.
    async fn deliver(&self, records: &[Record]) -> Result<(), SinkError>;
}

/// Sink forwarding records into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Record>,
}

impl ChannelSink {
    /// Create a sink and the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Record>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn deliver(&self, records: &[Record]) -> Result<(), SinkError> {
        for record in records {
            self.sender
                .send(record.clone())
                .map_err(|_| SinkError("receiver dropped".to_string()))?;
        }
        Ok(())
    }
}
