//! Status subcommand

use clap::Parser;

use super::{print_json, Cli, CliError, OutputFormat};
use crate::ingest::PartitionProgress;
use crate::store::{RunHistoryEntry, SqliteStore};

/// Show what is stored for each partition
#[derive(Parser, Debug)]
pub struct StatusCommand {
    /// Number of recent partition runs to show
    #[arg(long, default_value = "10")]
    pub runs: u32,
}

impl StatusCommand {
    /// Execute the status command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = cli.load_config()?;
        if !config.database.exists() {
            return Err(CliError::InvalidArgument(format!(
                "database {} does not exist",
                config.database.display()
            )));
        }

        let store = SqliteStore::connect(&config.database).await?;
        let progress = store.list_progress().await?;
        let runs = store.recent_runs(self.runs).await?;
        let records = store.record_count().await?;
        store.close().await;

        match cli.output_format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "database": config.database.display().to_string(),
                "records": records,
                "partitions": progress,
                "recent_runs": runs,
            })),
            OutputFormat::Human => output_human(records, &progress, &runs),
        }
        Ok(())
    }
}

fn output_human(records: u64, progress: &[PartitionProgress], runs: &[RunHistoryEntry]) {
    println!("Records stored: {records}");

    if progress.is_empty() {
        println!("No partition progress recorded");
    } else {
        println!(
            "\n{:<32} {:<12} {:>6} {:>8} {:>8} {:>10} {:>7}  cursor",
            "partition", "status", "pages", "fetched", "new", "duplicate", "failed"
        );
        for p in progress {
            println!(
                "{:<32} {:<12} {:>6} {:>8} {:>8} {:>10} {:>7}  {}",
                p.partition_id,
                p.status,
                p.pages,
                p.counts.fetched,
                p.counts.new,
                p.counts.duplicate,
                p.counts.failed,
                p.cursor_display(),
            );
            if let Some(error) = &p.last_error {
                println!("    last error: {error}");
            }
        }
    }

    if !runs.is_empty() {
        println!("\nRecent runs:");
        for run in runs {
            println!(
                "  {} {:<32} {:<12} new={} duplicate={} pages={}",
                run.finished_at.format("%Y-%m-%d %H:%M:%S"),
                run.partition_id,
                run.status,
                run.counts.new,
                run.counts.duplicate,
                run.pages,
            );
        }
    }
}
