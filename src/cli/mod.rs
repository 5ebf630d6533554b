//! CLI command implementations

pub mod error;
pub mod reset;
pub mod run;
pub mod status;
pub mod validate;

pub use error::CliError;
pub use reset::ResetCommand;
pub use run::RunArgs;
pub use status::StatusCommand;
pub use validate::ValidateCommand;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::IngestConfig;

/// Record ingest CLI
#[derive(Parser, Debug)]
#[command(name = "record-ingest")]
#[command(about = "Ingest paginated records from a rate-limited HTTP API into SQLite", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// JSON configuration file
    #[arg(long, global = true, env = "INGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(long, global = true, env = "INGEST_DATABASE")]
    pub database: Option<PathBuf>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, deduplicate and persist records for the configured partitions
    Run(RunArgs),

    /// Show stored partition progress and recent runs
    Status(StatusCommand),

    /// Check a configuration file without running it
    Validate(ValidateCommand),

    /// Forget partition progress so partitions restart from the first page
    Reset(ResetCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

impl Cli {
    /// Config file contents (or defaults) with the `--database` override applied.
    ///
    /// Not validated; commands validate what they need.
    pub fn load_config(&self) -> Result<IngestConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => IngestConfig::load(path)?,
            None => IngestConfig::default(),
        };
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        Ok(config)
    }
}

/// Print `value` as a single JSON line.
pub(crate) fn print_json(value: &serde_json::Value) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}
