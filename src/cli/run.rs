//! Run command implementation

use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use tracing::{error, info};

use super::{print_json, Cli, CliError, OutputFormat};
use crate::config::IngestConfig;
use crate::ingest::config::MAX_CONCURRENCY;
use crate::ingest::{Orchestrator, RunReport};
use crate::shutdown::SharedShutdown;
use crate::store::WriterLock;
use crate::{expand_daily_partitions, DateRange};

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

fn parse_date(input: &str, what: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid {what} date '{input}': {e}")))
}

/// Run command arguments
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Upstream API base URL
    #[arg(long, env = "INGEST_BASE_URL")]
    pub base_url: Option<String>,

    /// Records per storage transaction
    #[arg(long, env = "INGEST_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Partitions processed at once (max: 32)
    ///
    /// Every worker shares the same rate limiter, so raising this never
    /// raises the request rate beyond the configured ceiling.
    #[arg(long, env = "INGEST_CONCURRENCY", value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Requests admitted per rate window
    #[arg(long, env = "INGEST_RATE_LIMIT")]
    pub rate_limit: Option<u32>,

    /// Rate window length in seconds
    #[arg(long, env = "INGEST_RATE_WINDOW_SECS")]
    pub rate_window_secs: Option<f64>,

    /// Attempts per page including the first (range: 1-20)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: Option<u32>,

    /// Re-run partitions that already completed
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "INGEST_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Sources to backfill, one partition per source per day (comma separated)
    #[arg(long, value_delimiter = ',', requires = "start", requires = "end")]
    pub source: Vec<String>,

    /// First day of the backfill (YYYY-MM-DD)
    #[arg(long, requires = "source")]
    pub start: Option<String>,

    /// Last day of the backfill, inclusive (YYYY-MM-DD)
    #[arg(long, requires = "source")]
    pub end: Option<String>,
}

impl RunArgs {
    /// Apply flag overrides on top of the file configuration.
    pub fn apply(&self, config: &mut IngestConfig) -> Result<(), CliError> {
        if let Some(base_url) = &self.base_url {
            config.api.base_url = base_url.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(rate_limit) = self.rate_limit {
            config.rate_limit.max_requests = rate_limit;
        }
        if let Some(window) = self.rate_window_secs {
            config.rate_limit.window_secs = window;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }

        if !self.source.is_empty() {
            let (Some(start), Some(end)) = (&self.start, &self.end) else {
                return Err(CliError::InvalidArgument(
                    "--source requires --start and --end".to_string(),
                ));
            };
            let range = DateRange::new(parse_date(start, "start")?, parse_date(end, "end")?)
                .map_err(CliError::InvalidArgument)?;
            config.partitions = expand_daily_partitions(&self.source, range);
        }
        Ok(())
    }

    /// Execute the run command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let mut config = cli.load_config()?;
        self.apply(&mut config)?;
        config.validate()?;

        if config.partitions.is_empty() {
            return Err(CliError::InvalidArgument(
                "no partitions configured; add them to the config or use --source/--start/--end"
                    .to_string(),
            ));
        }

        let mut lock = WriterLock::open(&config.database)?;
        let _guard = lock.try_hold()?;

        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr).await?;
        }

        info!(
            database = %config.database.display(),
            partitions = config.partitions.len(),
            "Run starting"
        );

        let mut orchestrator = Orchestrator::from_config(&config)
            .await?
            .with_force(self.force)
            .with_shutdown(shutdown);

        let progress_bar = match cli.output_format {
            OutputFormat::Human => {
                let bar = create_progress_bar(config.partitions.len() as u64);
                orchestrator = orchestrator.with_progress_bar(bar.clone());
                Some(bar)
            }
            OutputFormat::Json => None,
        };

        let report = orchestrator.run(&config.partitions).await;
        if let Some(bar) = progress_bar {
            bar.finish_and_clear();
        }
        orchestrator.store().close().await;

        match cli.output_format {
            OutputFormat::Json => output_json(&report),
            OutputFormat::Human => output_human(&report),
        }

        if report.is_success() {
            Ok(())
        } else {
            Err(CliError::RunIncomplete {
                failed: report.failed_count(),
                interrupted: report.was_interrupted(),
            })
        }
    }
}

/// Output the run report as JSON
fn output_json(report: &RunReport) {
    let totals = report.totals();
    let output = serde_json::json!({
        "success": report.is_success(),
        "interrupted": report.was_interrupted(),
        "started_at": report.started_at,
        "finished_at": report.finished_at,
        "completed": report.completed_count(),
        "failed": report.failed_count(),
        "totals": totals,
        "partitions": report.partitions,
    });
    print_json(&output);
}

/// Output the run report in human-readable format
fn output_human(report: &RunReport) {
    println!(
        "\n{:<32} {:<12} {:>8} {:>8} {:>10} {:>7}  cursor",
        "partition", "status", "fetched", "new", "duplicate", "failed"
    );
    for p in &report.partitions {
        let status = if p.already_complete {
            "done".to_string()
        } else {
            p.status.to_string()
        };
        println!(
            "{:<32} {:<12} {:>8} {:>8} {:>10} {:>7}  {}",
            p.partition_id,
            status,
            p.counts.fetched,
            p.counts.new,
            p.counts.duplicate,
            p.counts.failed,
            p.cursor.as_deref().unwrap_or("-"),
        );
    }

    let totals = report.totals();
    println!(
        "\nTotal: {} fetched, {} new, {} duplicate, {} failed",
        totals.fetched, totals.new, totals.duplicate, totals.failed
    );

    for p in report.partitions.iter().filter(|p| p.is_failed()) {
        let error = p.error.as_deref().unwrap_or("unknown error");
        eprintln!("Partition {} failed: {error}", p.partition_id);
        error!(partition_id = %p.partition_id, error = %error, "Partition failed");
    }
    if report.was_interrupted() {
        eprintln!("Run interrupted; rerun the same command to resume.");
    } else if report.has_failures() {
        eprintln!("Some partitions failed; rerun the same command to resume them.");
    } else {
        println!("Run completed successfully!");
    }
}

/// Create progress bar over partitions
fn create_progress_bar(partitions: u64) -> ProgressBar {
    let pb = ProgressBar::new(partitions);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} partitions {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
