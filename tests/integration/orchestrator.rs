//! End-to-end orchestrator scenarios against a scripted upstream

use crate::support::{items, partition, temp_store, CollectingSink, ScriptedFetcher};
use record_ingest::fetcher::{Cursor, FetcherError};
use record_ingest::ingest::{Orchestrator, PartitionStatus};
use record_ingest::shutdown::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;

fn three_pages() -> Vec<Vec<String>> {
    vec![
        items("doc", 0, 100),
        items("doc", 100, 100),
        items("doc", 200, 50),
    ]
}

#[tokio::test]
async fn test_250_records_in_three_batches() {
    let (_dir, store) = temp_store().await;
    let fetcher = Arc::new(ScriptedFetcher::new().with_partition("p1", three_pages()));
    let sink = Arc::new(CollectingSink::default());

    let report = Orchestrator::new(fetcher.clone(), store.clone())
        .with_batch_size(100)
        .with_sink(sink.clone())
        .run(&[partition("p1")])
        .await;

    let p = report.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Completed);
    assert_eq!(p.counts.fetched, 250);
    assert_eq!(p.counts.new, 250);
    assert_eq!(p.counts.duplicate, 0);
    assert_eq!(p.pages, 3);
    assert_eq!(p.commits, 3);
    assert_eq!(sink.batch_sizes(), vec![100, 100, 50]);
    assert_eq!(fetcher.pages_requested("p1"), vec![1, 2, 3]);

    assert_eq!(store.record_count().await.unwrap(), 250);
    let stored = store.load_progress("p1").await.unwrap().unwrap();
    assert_eq!(stored.status, PartitionStatus::Completed);
    assert_eq!(stored.counts.new, 250);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_overlapping_pages_are_counted_as_duplicates() {
    let (_dir, store) = temp_store().await;
    // Page 2 repeats the last 10 items of page 1.
    let mut second = items("doc", 90, 10);
    second.extend(items("doc", 100, 90));
    let pages = vec![items("doc", 0, 100), second, items("doc", 190, 50)];
    let fetcher = Arc::new(ScriptedFetcher::new().with_partition("p1", pages));

    let report = Orchestrator::new(fetcher, store.clone())
        .run(&[partition("p1")])
        .await;

    let p = report.partition("p1").unwrap();
    assert_eq!(p.counts.fetched, 250);
    assert_eq!(p.counts.new, 240);
    assert_eq!(p.counts.duplicate, 10);
    assert_eq!(store.record_count().await.unwrap(), 240);
}

#[tokio::test]
async fn test_forced_rerun_persists_nothing_new() {
    let (_dir, store) = temp_store().await;
    let fetcher = Arc::new(ScriptedFetcher::new().with_partition("p1", three_pages()));

    Orchestrator::new(fetcher.clone(), store.clone())
        .run(&[partition("p1")])
        .await;
    let rerun = Orchestrator::new(fetcher, store.clone())
        .with_force(true)
        .run(&[partition("p1")])
        .await;

    let p = rerun.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Completed);
    assert_eq!(p.counts.new, 0);
    assert_eq!(p.counts.duplicate, 250);
    assert_eq!(store.record_count().await.unwrap(), 250);
}

#[tokio::test]
async fn test_failed_partition_resumes_from_durable_cursor() {
    let (_dir, store) = temp_store().await;
    let failing = Arc::new(
        ScriptedFetcher::new()
            .with_partition("p1", three_pages())
            .fail_page(
                "p1",
                3,
                FetcherError::TransientFailure {
                    attempts: 3,
                    message: "HTTP 503".to_string(),
                },
            ),
    );

    let first = Orchestrator::new(failing, store.clone())
        .run(&[partition("p1")])
        .await;
    let p = first.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Failed);
    assert_eq!(p.attempts, Some(3));
    assert_eq!(p.cursor.as_deref(), Some("page:3"));
    assert!(first.has_failures());
    assert_eq!(store.record_count().await.unwrap(), 200);

    let stored = store.load_progress("p1").await.unwrap().unwrap();
    assert_eq!(stored.status, PartitionStatus::Failed);
    assert_eq!(stored.cursor, Some(Cursor::Page(3)));
    assert!(stored.last_error.unwrap().contains("HTTP 503"));

    let healthy = Arc::new(ScriptedFetcher::new().with_partition("p1", three_pages()));
    let second = Orchestrator::new(healthy.clone(), store.clone())
        .run(&[partition("p1")])
        .await;
    let p = second.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Completed);
    assert_eq!(healthy.pages_requested("p1"), vec![3]);
    assert_eq!(p.counts.new, 50);
    assert_eq!(p.totals.new, 250);
    assert_eq!(store.record_count().await.unwrap(), 250);

    let runs = store.recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
}

#[tokio::test]
async fn test_abandoned_run_resumes_from_last_checkpoint() {
    let (_dir, store) = temp_store().await;
    let stalled = Arc::new(
        ScriptedFetcher::new()
            .with_partition("p1", three_pages())
            .hang_on_page(3),
    );

    // Drop the run while page 3 is in flight: nothing after the per-page
    // checkpoint of page 2 gets to run.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        Orchestrator::new(stalled.clone(), store.clone())
            .with_batch_size(100)
            .with_shutdown(ShutdownSignal::shared())
            .run(&[partition("p1")]),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(stalled.pages_requested("p1"), vec![1, 2, 3]);
    assert_eq!(store.record_count().await.unwrap(), 200);

    let stored = store.load_progress("p1").await.unwrap().unwrap();
    assert_eq!(stored.status, PartitionStatus::InProgress);
    assert_eq!(stored.cursor, Some(Cursor::Page(3)));

    let healthy = Arc::new(ScriptedFetcher::new().with_partition("p1", three_pages()));
    let resumed = Orchestrator::new(healthy.clone(), store.clone())
        .with_batch_size(100)
        .with_shutdown(ShutdownSignal::shared())
        .run(&[partition("p1")])
        .await;

    let p = resumed.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Completed);
    assert_eq!(healthy.pages_requested("p1"), vec![3]);
    assert_eq!(p.counts.new, 50);
    assert_eq!(store.record_count().await.unwrap(), 250);
}

#[tokio::test]
async fn test_fatal_pages_skipped_without_cap_by_default() {
    let (_dir, store) = temp_store().await;
    let pages: Vec<Vec<String>> = (0..6).map(|n| items("a", n * 2, 2)).collect();
    let mut fetcher = ScriptedFetcher::new().with_partition("p1", pages);
    for page in 2..=5 {
        fetcher = fetcher.fail_page(
            "p1",
            page,
            FetcherError::FatalRequest {
                status: 404,
                message: "gone".to_string(),
            },
        );
    }

    let report = Orchestrator::new(Arc::new(fetcher), store.clone())
        .with_shutdown(ShutdownSignal::shared())
        .run(&[partition("p1")])
        .await;

    let p = report.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Completed);
    assert_eq!(p.pages_skipped, 4);
    assert_eq!(p.counts.new, 4);
    assert_eq!(store.record_count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_one_failing_partition_does_not_stop_others() {
    let (_dir, store) = temp_store().await;
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_partition("bad", vec![items("bad", 0, 5)])
            .with_partition("good", vec![items("good", 0, 5), items("good", 5, 5)])
            .fail_page("bad", 1, FetcherError::RateLimitExceeded { attempts: 3 }),
    );

    let report = Orchestrator::new(fetcher, store.clone())
        .with_concurrency(2)
        .run(&[partition("bad"), partition("good")])
        .await;

    assert_eq!(report.partitions[0].partition_id, "bad");
    assert_eq!(report.partitions[0].status, PartitionStatus::Failed);
    assert_eq!(report.partitions[1].status, PartitionStatus::Completed);
    assert_eq!(report.partitions[1].counts.new, 10);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(store.partition_record_count("good").await.unwrap(), 10);
}

#[tokio::test]
async fn test_fatal_page_is_skipped_within_limit() {
    let (_dir, store) = temp_store().await;
    let pages = vec![items("a", 0, 3), items("a", 3, 3), items("a", 6, 3)];
    let not_found = FetcherError::FatalRequest {
        status: 404,
        message: "no such page".to_string(),
    };
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_partition("p1", pages.clone())
            .fail_page("p1", 2, not_found.clone()),
    );

    let report = Orchestrator::new(fetcher.clone(), store.clone())
        .run(&[partition("p1")])
        .await;
    let p = report.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Completed);
    assert_eq!(p.pages_skipped, 1);
    assert_eq!(p.counts.new, 6);
    assert_eq!(fetcher.pages_requested("p1"), vec![1, 2, 3]);

    let (_dir2, strict_store) = temp_store().await;
    let strict = Arc::new(
        ScriptedFetcher::new()
            .with_partition("p1", pages)
            .fail_page("p1", 2, not_found),
    );
    let report = Orchestrator::new(strict, strict_store)
        .with_max_skipped_pages(0)
        .run(&[partition("p1")])
        .await;
    let p = report.partition("p1").unwrap();
    assert_eq!(p.status, PartitionStatus::Failed);
    assert_eq!(p.cursor.as_deref(), Some("page:2"));
}

#[tokio::test]
async fn test_shutdown_keeps_progress_resumable() {
    let (_dir, store) = temp_store().await;
    let signal = ShutdownSignal::shared();
    let pages = vec![items("a", 0, 10), items("a", 10, 10), items("a", 20, 10)];
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_partition("first", pages.clone())
            .with_partition("second", vec![items("b", 0, 1)])
            .shutdown_after(1, signal.clone()),
    );

    let report = Orchestrator::new(fetcher, store.clone())
        .with_shutdown(signal)
        .run(&[partition("first"), partition("second")])
        .await;

    assert!(report.was_interrupted());
    assert!(!report.is_success());
    let first = report.partition("first").unwrap();
    assert_eq!(first.status, PartitionStatus::InProgress);
    assert!(first.interrupted);
    assert_eq!(first.counts.new, 10);
    assert_eq!(first.cursor.as_deref(), Some("page:2"));
    let second = report.partition("second").unwrap();
    assert_eq!(second.status, PartitionStatus::Pending);
    assert!(store.load_progress("second").await.unwrap().is_none());
    assert_eq!(store.record_count().await.unwrap(), 10);

    let resumed_fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_partition("first", pages)
            .with_partition("second", vec![items("b", 0, 1)]),
    );
    let resumed = Orchestrator::new(resumed_fetcher.clone(), store.clone())
        .with_shutdown(ShutdownSignal::shared())
        .run(&[partition("first"), partition("second")])
        .await;
    assert!(resumed.is_success());
    assert_eq!(resumed_fetcher.pages_requested("first"), vec![2, 3]);
    assert_eq!(store.record_count().await.unwrap(), 31);
}
