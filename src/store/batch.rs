//! Buffered batch writer
//!
//! Records are committed once `batch_size` of them are buffered, or when
//! [`BatchWriter::flush`] is called. Partition progress handed to
//! [`BatchWriter::checkpoint`] is written immediately if nothing is buffered,
//! otherwise inside the next commit.

use tracing::debug;

use super::{CommitOutcome, SqliteStore, StoreResult};
use crate::ingest::partition::PartitionProgress;
use crate::Record;

/// Accumulates records for one partition and commits them in batches.
pub struct BatchWriter {
    store: SqliteStore,
    batch_size: usize,
    buffer: Vec<Record>,
    pending: Option<PartitionProgress>,
    commits: u64,
}

impl BatchWriter {
    /// Writer committing every `batch_size` records (at least one).
    pub fn new(store: SqliteStore, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            pending: None,
            commits: 0,
        }
    }

    /// Records waiting for the next commit.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Transactions committed so far.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Buffer a record, committing if the batch is full.
    pub async fn add(&mut self, record: Record) -> StoreResult<Option<CommitOutcome>> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            return self.commit().await.map(Some);
        }
        Ok(None)
    }

    /// Persist `progress` no earlier than the records buffered so far.
    pub async fn checkpoint(&mut self, progress: &PartitionProgress) -> StoreResult<()> {
        if self.buffer.is_empty() {
            self.pending = None;
            self.store.save_progress(progress).await
        } else {
            self.pending = Some(progress.clone());
            Ok(())
        }
    }

    /// Commit whatever is buffered, along with any pending progress.
    pub async fn flush(&mut self) -> StoreResult<Option<CommitOutcome>> {
        if self.buffer.is_empty() {
            if let Some(progress) = self.pending.take() {
                self.store.save_progress(&progress).await?;
            }
            return Ok(None);
        }
        self.commit().await.map(Some)
    }

    async fn commit(&mut self) -> StoreResult<CommitOutcome> {
        let records = std::mem::take(&mut self.buffer);
        let mut pending = self.pending.take();
        let size = records.len();

        let outcome = self.store.commit_batch(records, pending.as_mut()).await?;
        self.commits += 1;
        debug!(
            commit = self.commits,
            size = size,
            with_progress = pending.is_some(),
            "Batch committed"
        );
        Ok(outcome)
    }
}
