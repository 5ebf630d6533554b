//! SQLite storage: records, partition progress and run history
//!
//! `records.content_hash` carries the unique constraint that makes
//! persistence idempotent. Inserts use `ON CONFLICT(content_hash) DO
//! NOTHING`, so a colliding record affects zero rows and the rest of the
//! transaction proceeds.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Executor, Sqlite, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{CommitOutcome, StoreError, StoreResult};
use crate::fetcher::Cursor;
use crate::ingest::partition::{PartitionCounts, PartitionProgress, PartitionStatus};
use crate::metrics::record_batch_commit;
use crate::Record;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_hash TEXT NOT NULL UNIQUE,
        partition_id TEXT NOT NULL,
        external_id TEXT,
        payload TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        persisted_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_records_partition ON records (partition_id)",
    r#"
    CREATE TABLE IF NOT EXISTS partition_progress (
        partition_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        cursor TEXT,
        count_fetched INTEGER NOT NULL DEFAULT 0,
        count_new INTEGER NOT NULL DEFAULT 0,
        count_duplicate INTEGER NOT NULL DEFAULT 0,
        count_failed INTEGER NOT NULL DEFAULT 0,
        pages INTEGER NOT NULL DEFAULT 0,
        pages_skipped INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS partition_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        partition_id TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        status TEXT NOT NULL,
        count_fetched INTEGER NOT NULL,
        count_new INTEGER NOT NULL,
        count_duplicate INTEGER NOT NULL,
        count_failed INTEGER NOT NULL,
        pages INTEGER NOT NULL,
        error TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_partition ON partition_runs (partition_id)",
];

const INSERT_RECORD: &str = r#"
    INSERT INTO records (content_hash, partition_id, external_id, payload, fetched_at, persisted_at)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT(content_hash) DO NOTHING
"#;

const UPSERT_PROGRESS: &str = r#"
    INSERT INTO partition_progress (
        partition_id, status, cursor, count_fetched, count_new, count_duplicate,
        count_failed, pages, pages_skipped, last_error, updated_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(partition_id) DO UPDATE SET
        status = excluded.status,
        cursor = excluded.cursor,
        count_fetched = excluded.count_fetched,
        count_new = excluded.count_new,
        count_duplicate = excluded.count_duplicate,
        count_failed = excluded.count_failed,
        pages = excluded.pages,
        pages_skipped = excluded.pages_skipped,
        last_error = excluded.last_error,
        updated_at = excluded.updated_at
"#;

const SELECT_PROGRESS: &str = r#"
    SELECT partition_id, status, cursor, count_fetched, count_new, count_duplicate,
           count_failed, pages, pages_skipped, last_error, updated_at
    FROM partition_progress
"#;

#[derive(sqlx::FromRow)]
struct ProgressRow {
    partition_id: String,
    status: String,
    cursor: Option<String>,
    count_fetched: i64,
    count_new: i64,
    count_duplicate: i64,
    count_failed: i64,
    pages: i64,
    pages_skipped: i64,
    last_error: Option<String>,
    updated_at: String,
}

impl TryFrom<ProgressRow> for PartitionProgress {
    type Error = StoreError;

    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            partition_id: row.partition_id.clone(),
            reason,
        };
        let status = row.status.parse::<PartitionStatus>().map_err(corrupt)?;
        let cursor = row
            .cursor
            .as_deref()
            .map(str::parse::<Cursor>)
            .transpose()
            .map_err(corrupt)?;
        let updated_at = parse_timestamp(&row.updated_at).map_err(corrupt)?;

        Ok(PartitionProgress {
            status,
            cursor,
            counts: PartitionCounts {
                fetched: to_u64(row.count_fetched),
                new: to_u64(row.count_new),
                duplicate: to_u64(row.count_duplicate),
                failed: to_u64(row.count_failed),
            },
            pages: to_u64(row.pages),
            pages_skipped: to_u64(row.pages_skipped),
            last_error: row.last_error,
            updated_at,
            partition_id: row.partition_id,
        })
    }
}

/// One finished attempt at a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunHistoryEntry {
    /// Partition id
    pub partition_id: String,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
    /// When it ended
    pub finished_at: DateTime<Utc>,
    /// Status at the end of the attempt
    pub status: PartitionStatus,
    /// Counts for this attempt only
    pub counts: PartitionCounts,
    /// Pages processed in this attempt
    pub pages: u64,
    /// Failure reason
    pub error: Option<String>,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    partition_id: String,
    started_at: String,
    finished_at: String,
    status: String,
    count_fetched: i64,
    count_new: i64,
    count_duplicate: i64,
    count_failed: i64,
    pages: i64,
    error: Option<String>,
}

impl TryFrom<RunRow> for RunHistoryEntry {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            partition_id: row.partition_id.clone(),
            reason,
        };
        Ok(RunHistoryEntry {
            started_at: parse_timestamp(&row.started_at).map_err(corrupt)?,
            finished_at: parse_timestamp(&row.finished_at).map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            counts: PartitionCounts {
                fetched: to_u64(row.count_fetched),
                new: to_u64(row.count_new),
                duplicate: to_u64(row.count_duplicate),
                failed: to_u64(row.count_failed),
            },
            pages: to_u64(row.pages),
            error: row.error,
            partition_id: row.partition_id,
        })
    }
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{value}': {e}"))
}

async fn upsert_progress<'e, E>(executor: E, progress: &PartitionProgress) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_PROGRESS)
        .bind(&progress.partition_id)
        .bind(progress.status.as_str())
        .bind(progress.cursor.as_ref().map(Cursor::to_string))
        .bind(to_i64(progress.counts.fetched))
        .bind(to_i64(progress.counts.new))
        .bind(to_i64(progress.counts.duplicate))
        .bind(to_i64(progress.counts.failed))
        .bind(to_i64(progress.pages))
        .bind(to_i64(progress.pages_skipped))
        .bind(progress.last_error.as_deref())
        .bind(progress.updated_at.to_rfc3339())
        .execute(executor)
        .await?;
    Ok(())
}

/// SQLite-backed store. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn connect(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Io(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        info!(path = %path.display(), "Opened record store");
        Ok(Self { pool })
    }

    /// Insert `records` in one transaction, skipping hash collisions.
    ///
    /// When `progress` is given, its counts are advanced by the outcome and
    /// the row is written inside the same transaction, so the stored cursor
    /// never points past records that are not committed.
    pub async fn commit_batch(
        &self,
        records: Vec<Record>,
        progress: Option<&mut PartitionProgress>,
    ) -> StoreResult<CommitOutcome> {
        let size = records.len();
        let persisted_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut outcome = CommitOutcome {
            persisted: Vec::with_capacity(size),
            duplicates: 0,
        };

        for record in records {
            let result = sqlx::query(INSERT_RECORD)
                .bind(&record.content_hash)
                .bind(&record.partition_id)
                .bind(record.external_id.as_deref())
                .bind(&record.payload)
                .bind(record.fetched_at.to_rfc3339())
                .bind(&persisted_at)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                debug!(
                    content_hash = %record.content_hash,
                    partition_id = %record.partition_id,
                    "Duplicate content hash, skipping record"
                );
                outcome.duplicates += 1;
            } else {
                outcome.persisted.push(record);
            }
        }

        if let Some(progress) = progress {
            progress.counts.new += outcome.inserted();
            progress.counts.duplicate += outcome.duplicates;
            progress.updated_at = Utc::now();
            upsert_progress(&mut *tx, progress).await?;
        }

        tx.commit().await?;
        record_batch_commit(size, outcome.inserted(), outcome.duplicates);
        debug!(
            size = size,
            inserted = outcome.inserted(),
            duplicates = outcome.duplicates,
            "Committed batch"
        );
        Ok(outcome)
    }

    /// Write a progress row on its own.
    pub async fn save_progress(&self, progress: &PartitionProgress) -> StoreResult<()> {
        upsert_progress(&self.pool, progress).await?;
        Ok(())
    }

    /// Stored progress for `partition_id`, if any.
    pub async fn load_progress(&self, partition_id: &str) -> StoreResult<Option<PartitionProgress>> {
        let row = sqlx::query_as::<_, ProgressRow>(&format!(
            "{SELECT_PROGRESS} WHERE partition_id = ?"
        ))
        .bind(partition_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PartitionProgress::try_from).transpose()
    }

    /// All stored progress rows, ordered by partition id.
    pub async fn list_progress(&self) -> StoreResult<Vec<PartitionProgress>> {
        let rows = sqlx::query_as::<_, ProgressRow>(&format!(
            "{SELECT_PROGRESS} ORDER BY partition_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PartitionProgress::try_from).collect()
    }

    /// Flag a partition failed without touching its cursor or counts.
    pub async fn mark_failed(&self, partition_id: &str, error: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE partition_progress SET status = ?, last_error = ?, updated_at = ? WHERE partition_id = ?",
        )
        .bind(PartitionStatus::Failed.as_str())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(partition_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete progress rows for the given partitions; records are kept.
    pub async fn reset_progress(&self, partition_ids: &[String]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in partition_ids {
            removed += sqlx::query("DELETE FROM partition_progress WHERE partition_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Delete every progress row; records are kept.
    pub async fn reset_all_progress(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM partition_progress")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Append a run history row.
    pub async fn record_run(&self, entry: &RunHistoryEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO partition_runs (
                partition_id, started_at, finished_at, status, count_fetched,
                count_new, count_duplicate, count_failed, pages, error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.partition_id)
        .bind(entry.started_at.to_rfc3339())
        .bind(entry.finished_at.to_rfc3339())
        .bind(entry.status.as_str())
        .bind(to_i64(entry.counts.fetched))
        .bind(to_i64(entry.counts.new))
        .bind(to_i64(entry.counts.duplicate))
        .bind(to_i64(entry.counts.failed))
        .bind(to_i64(entry.pages))
        .bind(entry.error.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent run history rows, newest first.
    pub async fn recent_runs(&self, limit: u32) -> StoreResult<Vec<RunHistoryEntry>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT partition_id, started_at, finished_at, status, count_fetched,
                   count_new, count_duplicate, count_failed, pages, error
            FROM partition_runs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RunHistoryEntry::try_from).collect()
    }

    /// Total persisted records.
    pub async fn record_count(&self) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(to_u64(count))
    }

    /// Persisted records first seen under `partition_id`.
    pub async fn partition_record_count(&self, partition_id: &str) -> StoreResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM records WHERE partition_id = ?")
                .bind(partition_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(to_u64(count))
    }

    /// Whether a record with `content_hash` is persisted.
    pub async fn contains_hash(&self, content_hash: &str) -> StoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM records WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Close the pool, waiting for connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
