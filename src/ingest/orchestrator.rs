//! Partition orchestrator
//!
//! Runs the fetch → classify → buffer loop for each partition, persisting
//! the cursor after every page and isolating failures per partition.
//! Partitions are processed through a bounded pool; within a partition pages
//! are strictly sequential.

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::partition::{PartitionProgress, PartitionStatus};
use super::report::{PartitionReport, RunReport};
use super::IngestError;
use crate::config::IngestConfig;
use crate::dedup::{Classification, Deduplicator};
use crate::fetcher::{Cursor, FetcherError, HttpFetcher, PageFetcher};
use crate::ingest::config::{DEFAULT_BATCH_SIZE, MAX_CONCURRENCY};
use crate::metrics::PartitionMetrics;
use crate::shutdown::{self, SharedShutdown};
use crate::store::{
    BatchWriter, CommitOutcome, RecordSink, RunHistoryEntry, SqliteStore, StoreError,
};
use crate::{PartitionSpec, Record};

/// Why a partition's page loop ended.
enum LoopEnd {
    /// Upstream has no more pages
    Exhausted,
    /// `max_pages` reached; the partition counts as complete
    PageCap,
    /// Shutdown requested
    Interrupted,
    /// Fetch failed beyond what the partition tolerates
    FetchFailed(FetcherError),
    /// Commit or progress write failed
    StorageFailed(StoreError),
}

/// Per-run bookkeeping that is not part of durable progress.
#[derive(Default)]
struct RunTally {
    pages: u64,
    pages_skipped: u64,
    commits: u64,
}

/// Drives partitions through fetch, dedup and batched persistence.
pub struct Orchestrator {
    fetcher: Arc<dyn PageFetcher>,
    store: SqliteStore,
    dedup: Mutex<Deduplicator>,
    batch_size: usize,
    concurrency: usize,
    max_skipped_pages: Option<u32>,
    force: bool,
    sink: Option<Arc<dyn RecordSink>>,
    shutdown: Option<SharedShutdown>,
    progress_bar: Option<ProgressBar>,
}

impl Orchestrator {
    /// Orchestrator with default batch size, sequential partitions and the
    /// global shutdown signal, if one is registered.
    pub fn new(fetcher: Arc<dyn PageFetcher>, store: SqliteStore) -> Self {
        Self {
            fetcher,
            store,
            dedup: Mutex::new(Deduplicator::new()),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: 1,
            max_skipped_pages: None,
            force: false,
            sink: None,
            shutdown: shutdown::get_global_shutdown(),
            progress_bar: None,
        }
    }

    /// Validate `config`, open its database and build the HTTP fetcher.
    pub async fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let store = SqliteStore::connect(&config.database).await?;
        let fetcher = HttpFetcher::from_config(
            &config.api,
            config.rate_limit.build_scope(),
            config.retry.policy(),
        )?;
        let mut orchestrator = Self::new(Arc::new(fetcher), store)
            .with_batch_size(config.batch_size)
            .with_concurrency(config.concurrency);
        if let Some(max_skipped_pages) = config.max_skipped_pages {
            orchestrator = orchestrator.with_max_skipped_pages(max_skipped_pages);
        }
        Ok(orchestrator)
    }

    /// Records per commit.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Partitions processed at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    /// Fail a partition once it has skipped `max_skipped_pages` pages in one run.
    ///
    /// Without a cap every page-fatal response on a page-number cursor is
    /// skipped and the partition carries on. With a cap, the next fatal page
    /// after the limit fails the partition instead, which is stricter than
    /// the default skip-and-continue rule.
    pub fn with_max_skipped_pages(mut self, max_skipped_pages: u32) -> Self {
        self.max_skipped_pages = Some(max_skipped_pages);
        self
    }

    /// Re-run partitions that an earlier run completed.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Hand newly persisted records to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use `shutdown` instead of the global signal.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Advance `bar` once per finished partition.
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Underlying store.
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Process every partition and report per-partition outcomes.
    ///
    /// Never fails as a whole: problems are reported on the partition they
    /// happened in.
    pub async fn run(&self, partitions: &[PartitionSpec]) -> RunReport {
        let started_at = chrono::Utc::now();
        info!(
            partitions = partitions.len(),
            concurrency = self.concurrency,
            batch_size = self.batch_size,
            source = self.fetcher.base_url(),
            "Starting ingestion run"
        );

        let mut reports: Vec<(usize, PartitionReport)> = stream::iter(partitions.iter().enumerate())
            .map(|(index, spec)| async move { (index, self.run_partition(spec).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        reports.sort_by_key(|(index, _)| *index);

        let report = RunReport {
            started_at,
            finished_at: chrono::Utc::now(),
            partitions: reports.into_iter().map(|(_, report)| report).collect(),
        };
        let totals = report.totals();
        info!(
            completed = report.completed_count(),
            failed = report.failed_count(),
            interrupted = report.was_interrupted(),
            fetched = totals.fetched,
            new = totals.new,
            duplicate = totals.duplicate,
            "Ingestion run finished"
        );
        report
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    async fn run_partition(&self, spec: &PartitionSpec) -> PartitionReport {
        if self.shutdown_requested() {
            info!(partition_id = %spec.id, "Shutdown requested, partition not started");
            return PartitionReport::not_started(&spec.id);
        }

        let span = info_span!("partition", partition_id = %spec.id, source = %spec.source);
        let timer = Instant::now();
        let mut report = self.process_partition(spec).instrument(span).await;
        report.elapsed_ms = timer.elapsed().as_millis() as u64;

        if let Some(bar) = &self.progress_bar {
            bar.inc(1);
            bar.set_message(format!("{} {}", report.partition_id, report.status));
        }
        report
    }

    async fn process_partition(&self, spec: &PartitionSpec) -> PartitionReport {
        let started_at = chrono::Utc::now();
        let metrics = PartitionMetrics::start(&spec.id);

        let mut progress = match self.store.load_progress(&spec.id).await {
            Ok(Some(stored)) if stored.status == PartitionStatus::Completed && !self.force => {
                info!("Partition already completed, skipping");
                let mut report = PartitionReport::from_progress(&stored, &stored.counts);
                report.already_complete = true;
                return report;
            }
            Ok(Some(mut stored)) if stored.status == PartitionStatus::Completed => {
                info!("Re-running completed partition from the first page");
                stored.cursor = None;
                stored
            }
            Ok(Some(stored)) => {
                info!(
                    cursor = %stored.cursor_display(),
                    status = %stored.status,
                    pages = stored.pages,
                    "Resuming partition"
                );
                stored
            }
            Ok(None) => PartitionProgress::new(&spec.id),
            Err(e) => {
                let message = format!("failed to load progress: {e}");
                metrics.record_failure(&message);
                return PartitionReport::failed_early(&spec.id, message);
            }
        };

        let baseline = progress.counts;
        if let Err(e) = progress.transition_to(PartitionStatus::InProgress) {
            metrics.record_failure(&e.to_string());
            return PartitionReport::failed_early(&spec.id, e.to_string());
        }
        progress.last_error = None;
        if let Err(e) = self.store.save_progress(&progress).await {
            let message = format!("failed to save progress: {e}");
            metrics.record_failure(&message);
            return PartitionReport::failed_early(&spec.id, message);
        }

        let mut writer = BatchWriter::new(self.store.clone(), self.batch_size);
        let mut tally = RunTally::default();
        let end = self
            .page_loop(spec, &mut progress, &mut writer, &mut tally)
            .await;

        let mut attempts = None;
        let storage_error = match end {
            LoopEnd::Exhausted => {
                self.finish(&mut progress, PartitionStatus::Completed, &mut writer, &mut tally)
                    .await
            }
            LoopEnd::PageCap => {
                info!(pages = tally.pages, "Page limit reached");
                self.finish(&mut progress, PartitionStatus::Completed, &mut writer, &mut tally)
                    .await
            }
            LoopEnd::Interrupted => {
                info!(
                    cursor = %progress.cursor_display(),
                    "Shutdown requested, saving progress"
                );
                self.finish(&mut progress, PartitionStatus::InProgress, &mut writer, &mut tally)
                    .await
            }
            LoopEnd::FetchFailed(e) => {
                attempts = e.attempts();
                error!(
                    cursor = %progress.cursor_display(),
                    attempts = ?attempts,
                    error = %e,
                    "Page fetch failed, partition stopped"
                );
                progress.last_error = Some(e.to_string());
                self.finish(&mut progress, PartitionStatus::Failed, &mut writer, &mut tally)
                    .await
            }
            LoopEnd::StorageFailed(e) => Some(e),
        };

        if let Some(e) = storage_error {
            let message = format!("storage failure: {e}");
            error!(cursor = %progress.cursor_display(), error = %e, "Commit failed, partition stopped");
            progress.status = PartitionStatus::Failed;
            progress.last_error = Some(message.clone());
            if let Err(mark_err) = self.store.mark_failed(&spec.id, &message).await {
                warn!(error = %mark_err, "Could not record partition failure");
            }
            // Report the cursor that is actually durable.
            progress.cursor = match self.store.load_progress(&spec.id).await {
                Ok(Some(stored)) => stored.cursor,
                _ => None,
            };
        }

        let entry = RunHistoryEntry {
            partition_id: spec.id.clone(),
            started_at,
            finished_at: chrono::Utc::now(),
            status: progress.status,
            counts: progress.counts.since(&baseline),
            pages: tally.pages,
            error: progress.last_error.clone(),
        };
        if let Err(e) = self.store.record_run(&entry).await {
            warn!(error = %e, "Failed to record run history");
        }

        match progress.status {
            PartitionStatus::Completed => metrics.record_success(entry.counts.new),
            PartitionStatus::Failed => {
                metrics.record_failure(progress.last_error.as_deref().unwrap_or("unknown"))
            }
            _ => {}
        }

        let mut report = PartitionReport::from_progress(&progress, &baseline);
        report.pages = tally.pages;
        report.pages_skipped = tally.pages_skipped;
        report.commits = tally.commits;
        report.attempts = attempts;
        report.interrupted = progress.status == PartitionStatus::InProgress;
        report
    }

    async fn page_loop(
        &self,
        spec: &PartitionSpec,
        progress: &mut PartitionProgress,
        writer: &mut BatchWriter,
        tally: &mut RunTally,
    ) -> LoopEnd {
        loop {
            if self.shutdown_requested() {
                return LoopEnd::Interrupted;
            }
            if let Some(max_pages) = spec.max_pages {
                if tally.pages >= u64::from(max_pages) {
                    return LoopEnd::PageCap;
                }
            }

            let page = match self.fetcher.fetch_page(spec, progress.cursor.as_ref()).await {
                Ok(page) => page,
                Err(FetcherError::Cancelled) => return LoopEnd::Interrupted,
                Err(e) if e.is_page_fatal() => {
                    let current = progress.cursor.clone().unwrap_or_else(Cursor::first);
                    match current.next_page() {
                        Some(next) if self.may_skip(tally) => {
                            warn!(cursor = %current, error = %e, "Skipping page after fatal response");
                            tally.pages_skipped += 1;
                            progress.pages_skipped += 1;
                            progress.cursor = Some(next);
                            if let Err(e) = writer.checkpoint(progress).await {
                                return LoopEnd::StorageFailed(e);
                            }
                            continue;
                        }
                        _ => return LoopEnd::FetchFailed(e),
                    }
                }
                Err(e) => return LoopEnd::FetchFailed(e),
            };

            tally.pages += 1;
            progress.pages += 1;
            progress.counts.fetched += page.records.len() as u64;
            progress.counts.failed += page.malformed;

            for record in page.records {
                if self.classify(&record) == Classification::Duplicate {
                    progress.counts.duplicate += 1;
                    continue;
                }
                match writer.add(record).await {
                    Ok(Some(outcome)) => self.apply_commit(progress, tally, outcome).await,
                    Ok(None) => {}
                    Err(e) => return LoopEnd::StorageFailed(e),
                }
            }

            let exhausted = !page.has_more
                || page.next_cursor.is_none()
                || page.next_cursor == progress.cursor;
            if exhausted {
                return LoopEnd::Exhausted;
            }

            progress.cursor = page.next_cursor;
            progress.updated_at = chrono::Utc::now();
            if let Err(e) = writer.checkpoint(progress).await {
                return LoopEnd::StorageFailed(e);
            }
            debug!(
                cursor = %progress.cursor_display(),
                pages = tally.pages,
                buffered = writer.buffered(),
                "Page processed"
            );
        }
    }

    /// Move to `status` and persist it together with any buffered records.
    async fn finish(
        &self,
        progress: &mut PartitionProgress,
        status: PartitionStatus,
        writer: &mut BatchWriter,
        tally: &mut RunTally,
    ) -> Option<StoreError> {
        if status != progress.status {
            if let Err(e) = progress.transition_to(status) {
                warn!(error = %e, "Unexpected status transition");
                progress.status = status;
            }
        }
        progress.updated_at = chrono::Utc::now();

        if let Err(e) = writer.checkpoint(progress).await {
            return Some(e);
        }
        match writer.flush().await {
            Ok(Some(outcome)) => {
                self.apply_commit(progress, tally, outcome).await;
                None
            }
            Ok(None) => None,
            Err(e) => Some(e),
        }
    }

    fn may_skip(&self, tally: &RunTally) -> bool {
        self.max_skipped_pages
            .map_or(true, |cap| tally.pages_skipped < u64::from(cap))
    }

    fn classify(&self, record: &Record) -> Classification {
        self.dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .classify(record)
    }

    async fn apply_commit(
        &self,
        progress: &mut PartitionProgress,
        tally: &mut RunTally,
        outcome: CommitOutcome,
    ) {
        tally.commits += 1;
        progress.counts.new += outcome.inserted();
        progress.counts.duplicate += outcome.duplicates;

        if let Some(sink) = &self.sink {
            if outcome.persisted.is_empty() {
                return;
            }
            if let Err(e) = sink.deliver(&outcome.persisted).await {
                warn!(
                    error = %e,
                    records = outcome.persisted.len(),
                    "Record sink rejected committed records"
                );
            }
        }
    }
}
