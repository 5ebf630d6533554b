//! Partition status and resumable progress

use crate::fetcher::Cursor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::IngestError;

/// Partition lifecycle: `Pending → InProgress → {Completed | Failed}`.
///
/// Resuming moves a `Failed` (or forced `Completed`) partition back to
/// `InProgress`; nothing reaches a terminal state without passing through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    /// Not started yet
    #[default]
    Pending,
    /// Started, not finished; also the state of an interrupted partition
    InProgress,
    /// Upstream reported no more data
    Completed,
    /// Stopped on an unrecoverable error; cursor kept for resume
    Failed,
}

impl PartitionStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the partition has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: PartitionStatus) -> bool {
        use PartitionStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, InProgress)
                | (Completed, InProgress)
        )
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown partition status '{other}'")),
        }
    }
}

/// Record counters for a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCounts {
    /// Records returned by upstream
    pub fetched: u64,
    /// Records inserted into storage
    pub new: u64,
    /// Records already known, in-run or in storage
    pub duplicate: u64,
    /// Items that could not become records
    pub failed: u64,
}

impl PartitionCounts {
    /// Counts accumulated since `earlier`.
    pub fn since(&self, earlier: &PartitionCounts) -> PartitionCounts {
        PartitionCounts {
            fetched: self.fetched.saturating_sub(earlier.fetched),
            new: self.new.saturating_sub(earlier.new),
            duplicate: self.duplicate.saturating_sub(earlier.duplicate),
            failed: self.failed.saturating_sub(earlier.failed),
        }
    }

    /// Add another set of counts.
    pub fn accumulate(&mut self, other: &PartitionCounts) {
        self.fetched += other.fetched;
        self.new += other.new;
        self.duplicate += other.duplicate;
        self.failed += other.failed;
    }
}

/// Durable progress of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionProgress {
    /// Partition id
    pub partition_id: String,
    /// Lifecycle state
    pub status: PartitionStatus,
    /// Next page to fetch; `None` means the first page
    pub cursor: Option<Cursor>,
    /// Running counts across runs
    pub counts: PartitionCounts,
    /// Pages processed
    pub pages: u64,
    /// Pages given up on after a fatal response
    pub pages_skipped: u64,
    /// Error that failed the partition
    pub last_error: Option<String>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl PartitionProgress {
    /// Fresh progress for a partition that has never run.
    pub fn new(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            status: PartitionStatus::Pending,
            cursor: None,
            counts: PartitionCounts::default(),
            pages: 0,
            pages_skipped: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition_to(&mut self, next: PartitionStatus) -> Result<(), IngestError> {
        if !self.status.can_transition_to(next) {
            return Err(IngestError::InvalidTransition {
                partition_id: self.partition_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Cursor rendered for logs.
    pub fn cursor_display(&self) -> String {
        self.cursor
            .as_ref()
            .map(Cursor::to_string)
            .unwrap_or_else(|| "start".to_string())
    }
}
