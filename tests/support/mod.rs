//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use record_ingest::fetcher::{Cursor, FetcherError, FetcherResult, Page, PageFetcher};
use record_ingest::shutdown::SharedShutdown;
use record_ingest::store::{RecordSink, SinkError, SqliteStore};
use record_ingest::{DateRange, PartitionSpec, Record};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tempfile::TempDir;

/// In-memory upstream serving fixed pages per partition.
///
/// Pages are addressed by page-number cursors starting at 1. Failures can be
/// queued per page; each queued failure is returned once before the page
/// succeeds.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: HashMap<String, Vec<Vec<String>>>,
    failures: Mutex<HashMap<(String, u64), VecDeque<FetcherError>>>,
    calls: Mutex<Vec<(String, u64)>>,
    shutdown_after: Option<(usize, SharedShutdown)>,
    hang_on: Option<u64>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition(mut self, partition_id: &str, pages: Vec<Vec<String>>) -> Self {
        self.pages.insert(partition_id.to_string(), pages);
        self
    }

    pub fn fail_page(self, partition_id: &str, page: u64, error: FetcherError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry((partition_id.to_string(), page))
            .or_default()
            .push_back(error);
        self
    }

    /// Request shutdown once `calls` pages have been served.
    pub fn shutdown_after(mut self, calls: usize, shutdown: SharedShutdown) -> Self {
        self.shutdown_after = Some((calls, shutdown));
        self
    }

    /// Never answer requests for `page`, as if the upstream stopped responding.
    pub fn hang_on_page(mut self, page: u64) -> Self {
        self.hang_on = Some(page);
        self
    }

    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn pages_requested(&self, partition_id: &str) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter(|(id, _)| id == partition_id)
            .map(|(_, page)| page)
            .collect()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(
        &self,
        partition: &PartitionSpec,
        cursor: Option<&Cursor>,
    ) -> FetcherResult<Page> {
        let page = cursor.and_then(Cursor::page_number).unwrap_or(1);
        let served = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((partition.id.clone(), page));
            calls.len()
        };
        if let Some((after, shutdown)) = &self.shutdown_after {
            if served >= *after {
                shutdown.request_shutdown();
            }
        }

        if self.hang_on == Some(page) {
            std::future::pending::<()>().await;
        }

        let queued = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(partition.id.clone(), page))
            .and_then(VecDeque::pop_front);
        if let Some(error) = queued {
            return Err(error);
        }

        let pages = self.pages.get(&partition.id).cloned().unwrap_or_default();
        let items = pages.get(page as usize - 1).cloned().unwrap_or_default();
        let has_more = (page as usize) < pages.len();
        let fetched_at = Utc::now();

        Ok(Page {
            records: items
                .iter()
                .map(|text| {
                    let payload = serde_json::json!({ "text": text }).to_string();
                    Record::new(&partition.id, Some(text.clone()), text, payload, fetched_at)
                })
                .collect(),
            next_cursor: has_more.then(|| Cursor::Page(page + 1)),
            has_more,
            malformed: 0,
            total_count: None,
        })
    }

    fn base_url(&self) -> &str {
        "scripted://"
    }
}

/// Sink remembering the size of every delivered batch.
#[derive(Default)]
pub struct CollectingSink {
    batches: Mutex<Vec<usize>>,
}

impl CollectingSink {
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn deliver(&self, records: &[Record]) -> Result<(), SinkError> {
        self.batches.lock().unwrap().push(records.len());
        Ok(())
    }
}

/// `count` distinct item texts, `"{prefix}-{n}"` for n in `start..start + count`.
pub fn items(prefix: &str, start: usize, count: usize) -> Vec<String> {
    (start..start + count).map(|n| format!("{prefix}-{n}")).collect()
}

/// Single-day partition with an explicit id.
pub fn partition(id: &str) -> PartitionSpec {
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    PartitionSpec::new("news", DateRange::day(day)).with_id(id)
}

/// Fresh store in a temporary directory.
pub async fn temp_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::connect(&dir.path().join("ingest.db"))
        .await
        .unwrap();
    (dir, store)
}
