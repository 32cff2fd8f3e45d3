//! Validate subcommand

use clap::Parser;
use std::path::PathBuf;

use super::CliError;
use crate::config::PipelineConfig;

/// Load a config and check it without any I/O beyond reading the file
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// Pipeline config file (.json or .toml)
    #[arg(long, short)]
    pub config: PathBuf,
}

impl ValidateCommand {
    /// Execute the validation command
    pub fn execute(&self) -> Result<(), CliError> {
        let config = PipelineConfig::load(&self.config)?;
        if let Err(e) = config.validate() {
            eprintln!("Invalid config {}: {}", self.config.display(), e);
            return Err(e.into());
        }

        println!("Valid config: {}", self.config.display());
        println!("  URL: {}", config.url);
        println!("  Requests: {}", config.requests.len());
        println!("  Storage targets: {}", config.dns_list.len());
        println!("  Fetch workers: {}", config.fetch_workers());
        println!("  Storage workers: {}", config.storage_workers());
        if config.truncate {
            println!("  Tables are truncated before the first upsert");
        }
        Ok(())
    }
}
