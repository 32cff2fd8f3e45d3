//! Plan subcommand

use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use super::{CliError, OutputFormat};
use crate::config::PipelineConfig;
use crate::pipeline::Pipeline;

/// Print the requests a run would make
#[derive(Parser, Debug)]
pub struct PlanCommand {
    /// Pipeline config file (.json or .toml)
    #[arg(long, short)]
    pub config: PathBuf,
}

impl PlanCommand {
    /// Execute the plan command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let config = PipelineConfig::load(&self.config)?;
        let requests = Pipeline::new(config).plan()?;

        match format {
            OutputFormat::Human => {
                for request in &requests {
                    println!("{request}");
                }
                println!("{} request(s)", requests.len());
            }
            OutputFormat::Json => {
                let planned: Vec<_> = requests
                    .iter()
                    .map(|r| {
                        json!({
                            "method": r.method().as_str(),
                            "url": r.url().as_str(),
                            "table": r.table(),
                        })
                    })
                    .collect();
                let rendered = serde_json::to_string_pretty(&planned)
                    .map_err(|e| CliError::OutputError(e.to_string()))?;
                println!("{rendered}");
            }
        }
        Ok(())
    }
}
