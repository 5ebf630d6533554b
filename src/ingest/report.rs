//! Run and partition summaries

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::partition::{PartitionCounts, PartitionProgress, PartitionStatus};

/// Outcome of one partition within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    /// Partition id
    pub partition_id: String,
    /// Status at the end of the run
    pub status: PartitionStatus,
    /// Durable cursor to resume from
    pub cursor: Option<String>,
    /// Counts for this run only
    pub counts: PartitionCounts,
    /// Counts across all runs
    pub totals: PartitionCounts,
    /// Pages processed this run
    pub pages: u64,
    /// Pages skipped this run after a fatal response
    pub pages_skipped: u64,
    /// Storage transactions committed this run
    pub commits: u64,
    /// Attempts spent on the page that failed the partition
    pub attempts: Option<u32>,
    /// Failure reason
    pub error: Option<String>,
    /// Stopped by shutdown before finishing (or before starting)
    pub interrupted: bool,
    /// Skipped because an earlier run completed it
    pub already_complete: bool,
    /// Wall time spent on the partition
    pub elapsed_ms: u64,
}

impl PartitionReport {
    /// Report built from final progress and this run's baseline counts.
    pub fn from_progress(progress: &PartitionProgress, baseline: &PartitionCounts) -> Self {
        Self {
            partition_id: progress.partition_id.clone(),
            status: progress.status,
            cursor: progress.cursor.as_ref().map(ToString::to_string),
            counts: progress.counts.since(baseline),
            totals: progress.counts,
            pages: 0,
            pages_skipped: 0,
            commits: 0,
            attempts: None,
            error: progress.last_error.clone(),
            interrupted: false,
            already_complete: false,
            elapsed_ms: 0,
        }
    }

    /// Partition never started because shutdown was requested first.
    pub fn not_started(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            status: PartitionStatus::Pending,
            cursor: None,
            counts: PartitionCounts::default(),
            totals: PartitionCounts::default(),
            pages: 0,
            pages_skipped: 0,
            commits: 0,
            attempts: None,
            error: None,
            interrupted: true,
            already_complete: false,
            elapsed_ms: 0,
        }
    }

    /// Partition that could not even load or save its progress.
    pub fn failed_early(partition_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: PartitionStatus::Failed,
            error: Some(error.into()),
            interrupted: false,
            ..Self::not_started(partition_id)
        }
    }

    /// Whether this partition makes the run unsuccessful.
    pub fn is_failed(&self) -> bool {
        self.status == PartitionStatus::Failed
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run ended
    pub finished_at: DateTime<Utc>,
    /// One report per requested partition, in request order
    pub partitions: Vec<PartitionReport>,
}

impl RunReport {
    /// Partitions that ended Failed.
    pub fn failed_count(&self) -> usize {
        self.partitions.iter().filter(|p| p.is_failed()).count()
    }

    /// Partitions that ended Completed (including ones skipped as already complete).
    pub fn completed_count(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.status == PartitionStatus::Completed)
            .count()
    }

    /// Whether any partition failed.
    pub fn has_failures(&self) -> bool {
        self.partitions.iter().any(PartitionReport::is_failed)
    }

    /// Whether shutdown cut the run short.
    pub fn was_interrupted(&self) -> bool {
        self.partitions.iter().any(|p| p.interrupted)
    }

    /// Whether the run finished everything without failures.
    pub fn is_success(&self) -> bool {
        !self.has_failures() && !self.was_interrupted()
    }

    /// Sum of this run's counts over all partitions.
    pub fn totals(&self) -> PartitionCounts {
        let mut totals = PartitionCounts::default();
        for partition in &self.partitions {
            totals.accumulate(&partition.counts);
        }
        totals
    }

    /// Report for `partition_id`.
    pub fn partition(&self, partition_id: &str) -> Option<&PartitionReport> {
        self.partitions.iter().find(|p| p.partition_id == partition_id)
    }
}
