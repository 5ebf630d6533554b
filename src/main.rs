//! Main entry point for the record-ingest CLI

use clap::Parser;
use record_ingest::cli::{Cli, Commands};
use record_ingest::shutdown::{self, ShutdownSignal};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("record_ingest=info"));

    // stdout carries the report; logs go to stderr
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // Install global shutdown signal and Ctrl+C handler
    let shutdown = ShutdownSignal::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing current batches and saving progress...");
                shutdown.request_shutdown();
            }
        }
    });

    let result = match cli.command {
        Commands::Run(ref args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Status(ref cmd) => cmd.execute(&cli).await.map_err(|e| anyhow::anyhow!(e)),
        Commands::Validate(ref cmd) => cmd.execute(&cli).await.map_err(|e| anyhow::anyhow!(e)),
        Commands::Reset(ref cmd) => cmd.execute(&cli).await.map_err(|e| anyhow::anyhow!(e)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
