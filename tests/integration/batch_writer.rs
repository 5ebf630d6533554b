//! Batch commits against a real SQLite file

use crate::support::temp_store;
use chrono::Utc;
use record_ingest::fetcher::Cursor;
use record_ingest::ingest::{PartitionProgress, PartitionStatus};
use record_ingest::store::BatchWriter;
use record_ingest::Record;

fn record(n: usize) -> Record {
    let text = format!("judgment {n}");
    Record::new("p1", Some(n.to_string()), &text, text.clone(), Utc::now())
}

#[tokio::test]
async fn test_conflicting_record_does_not_roll_back_batch() {
    let (_dir, store) = temp_store().await;
    store.commit_batch(vec![record(57)], None).await.unwrap();

    let mut writer = BatchWriter::new(store.clone(), 100);
    let mut outcome = None;
    for n in 1..=100 {
        if let Some(committed) = writer.add(record(n)).await.unwrap() {
            outcome = Some(committed);
        }
    }

    let outcome = outcome.expect("batch of 100 should commit");
    assert_eq!(outcome.batch_size(), 100);
    assert_eq!(outcome.inserted(), 99);
    assert_eq!(outcome.duplicates, 1);
    assert!(outcome
        .persisted
        .iter()
        .all(|r| r.external_id.as_deref() != Some("57")));
    assert_eq!(store.record_count().await.unwrap(), 100);
}

#[tokio::test]
async fn test_equivalent_payloads_share_one_row() {
    let (_dir, store) = temp_store().await;
    let a = Record::new("p1", None, "  Hello\u{200B}  world ", "a", Utc::now());
    let b = Record::new("p2", None, "Hello world", "b", Utc::now());
    assert_eq!(a.content_hash, b.content_hash);

    let outcome = store.commit_batch(vec![a, b], None).await.unwrap();
    assert_eq!(outcome.inserted(), 1);
    assert_eq!(outcome.duplicates, 1);
    assert!(store.contains_hash(&outcome.persisted[0].content_hash).await.unwrap());
}

#[tokio::test]
async fn test_progress_rides_with_commit() {
    let (_dir, store) = temp_store().await;
    let mut writer = BatchWriter::new(store.clone(), 3);
    let mut progress = PartitionProgress::new("p1");
    progress.transition_to(PartitionStatus::InProgress).unwrap();

    writer.add(record(1)).await.unwrap();
    writer.add(record(2)).await.unwrap();
    progress.cursor = Some(Cursor::Page(2));
    writer.checkpoint(&progress).await.unwrap();
    assert!(store.load_progress("p1").await.unwrap().is_none());

    // Third record fills the batch; the stashed cursor is written with it.
    writer.add(record(3)).await.unwrap();
    let stored = store.load_progress("p1").await.unwrap().unwrap();
    assert_eq!(stored.cursor, Some(Cursor::Page(2)));
    assert_eq!(stored.counts.new, 3);
    assert_eq!(stored.status, PartitionStatus::InProgress);
}
