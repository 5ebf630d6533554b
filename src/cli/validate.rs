//! Validation subcommand

use clap::Parser;

use super::{print_json, Cli, CliError, OutputFormat};

/// Check a configuration file without touching the database or network
#[derive(Parser, Debug)]
pub struct ValidateCommand {}

impl ValidateCommand {
    /// Execute the validation command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        if cli.config.is_none() {
            return Err(CliError::InvalidArgument(
                "validate requires --config".to_string(),
            ));
        }
        let config = cli.load_config()?;

        if let Err(e) = config.validate() {
            if let OutputFormat::Json = cli.output_format {
                print_json(&serde_json::json!({ "valid": false, "error": e.to_string() }));
            } else {
                eprintln!("Invalid configuration: {e}");
            }
            return Err(e.into());
        }

        match cli.output_format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "valid": true,
                "database": config.database.display().to_string(),
                "url": config.api.url(),
                "partitions": config.partitions.len(),
            })),
            OutputFormat::Human => {
                println!("Configuration is valid");
                println!("  Database: {}", config.database.display());
                println!("  Endpoint: {}", config.api.url());
                println!(
                    "  Rate limit: {} requests per {}s ({:?} scope)",
                    config.rate_limit.max_requests,
                    config.rate_limit.window_secs,
                    config.rate_limit.scope
                );
                println!("  Partitions: {}", config.partitions.len());
                for partition in &config.partitions {
                    println!("    - {} ({} {})", partition.id, partition.source, partition.date_range);
                }
            }
        }
        Ok(())
    }
}
