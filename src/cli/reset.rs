//! Reset subcommand

use clap::Parser;
use tracing::info;

use super::{print_json, Cli, CliError, OutputFormat};
use crate::store::{SqliteStore, WriterLock};

/// Delete stored progress so partitions start over. Records are kept.
#[derive(Parser, Debug)]
pub struct ResetCommand {
    /// Reset every partition
    #[arg(long, conflicts_with = "partitions")]
    pub all: bool,

    /// Partition ids to reset
    #[arg(required_unless_present = "all")]
    pub partitions: Vec<String>,
}

impl ResetCommand {
    /// Execute the reset command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = cli.load_config()?;
        let mut lock = WriterLock::open(&config.database)?;
        let _guard = lock.try_hold()?;

        let store = SqliteStore::connect(&config.database).await?;
        let removed = if self.all {
            store.reset_all_progress().await?
        } else {
            store.reset_progress(&self.partitions).await?
        };
        store.close().await;
        info!(removed = removed, all = self.all, "Partition progress reset");

        match cli.output_format {
            OutputFormat::Json => print_json(&serde_json::json!({ "reset": removed })),
            OutputFormat::Human => println!("Reset {removed} partition(s)"),
        }
        Ok(())
    }
}
