//! Example: embed the ingestion pipeline in another program
//!
//! Runs one backfill against an HTTP API and consumes every newly persisted
//! record from a channel, the way a downstream indexer would.
//!
//! Run with:
//! ```bash
//! INGEST_BASE_URL=https://api.example.org cargo run --example embedded_pipeline
//! ```

use chrono::NaiveDate;
use record_ingest::config::IngestConfig;
use record_ingest::shutdown::{self, ShutdownSignal};
use record_ingest::store::ChannelSink;
use record_ingest::{expand_daily_partitions, DateRange, Orchestrator};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("record_ingest=info")
        .init();

    let mut config = IngestConfig::default();
    config.api.base_url =
        std::env::var("INGEST_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    config.api.endpoint = "/search".to_string();
    config.database = "embedded_demo.db".into();
    config.rate_limit.max_requests = 30;
    config.concurrency = 2;

    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("bad date")?,
        NaiveDate::from_ymd_opt(2024, 1, 3).ok_or("bad date")?,
    )?;
    config.partitions = expand_daily_partitions(&["TJSP".to_string(), "STF".to_string()], range);
    config.validate()?;

    let signal = ShutdownSignal::shared();
    shutdown::set_global_shutdown(signal.clone());
    tokio::spawn({
        let signal = signal.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal.request_shutdown();
            }
        }
    });

    let (sink, mut records) = ChannelSink::new();
    let consumer = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(record) = records.recv().await {
            seen += 1;
            if seen <= 5 {
                println!(
                    "[{}] {} {}",
                    record.partition_id,
                    record.external_id.as_deref().unwrap_or("-"),
                    &record.content_hash[..12]
                );
            }
        }
        seen
    });

    let orchestrator = Orchestrator::from_config(&config)
        .await?
        .with_sink(Arc::new(sink));
    let report = orchestrator.run(&config.partitions).await;
    // Dropping the orchestrator drops the sink and closes the channel.
    drop(orchestrator);

    let delivered = consumer.await?;
    let totals = report.totals();
    println!(
        "\n{} partitions, {} fetched, {} new, {} duplicate; {delivered} records delivered downstream",
        report.partitions.len(),
        totals.fetched,
        totals.new,
        totals.duplicate
    );
    if !report.is_success() {
        println!("Run incomplete; run again to resume.");
    }
    Ok(())
}
