//! Run command and top-level CLI definition

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::{CliError, PlanCommand, ValidateCommand};
use crate::config::PipelineConfig;
use crate::metrics::init_metrics;
use crate::pipeline::{Pipeline, RunProgress, RunSummary};
use crate::shutdown::SharedCancel;

/// Replicate web API data into storage targets
#[derive(Parser, Debug)]
#[command(name = "api-replicator", version, about)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run(RunCommand),

    /// Check a config without running it
    Validate(ValidateCommand),

    /// Print the requests a config resolves to
    Plan(PlanCommand),
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

/// Run command arguments
#[derive(Parser, Debug)]
pub struct RunCommand {
    /// Pipeline config file (.json or .toml)
    #[arg(long, short)]
    pub config: PathBuf,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Hide the progress bar
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

impl RunCommand {
    /// Execute the run command
    pub async fn execute(
        &self,
        format: OutputFormat,
        cancel: SharedCancel,
    ) -> Result<RunSummary, CliError> {
        let config = PipelineConfig::load(&self.config)?;

        if let Some(addr) = self.metrics_addr {
            init_metrics(addr)
                .await
                .map_err(|e| CliError::MetricsError(e.to_string()))?;
        }

        info!(config = %self.config.display(), "Starting pipeline");
        let mut pipeline = Pipeline::new(config).with_cancel(cancel);

        let progress_bar = (!self.no_progress).then(create_progress_bar);
        if let Some(pb) = &progress_bar {
            let pb = pb.clone();
            pipeline = pipeline.with_progress(Arc::new(move |progress: RunProgress| {
                pb.set_length(progress.expected as u64);
                pb.set_position(progress.completed as u64);
            }));
        }

        let result = pipeline.run().await;

        if let Some(pb) = progress_bar {
            match &result {
                Ok(_) => pb.finish_with_message("Replication complete"),
                Err(_) => pb.abandon_with_message("Replication failed"),
            }
        }

        let summary = result?;
        print_summary(format, &summary)?;
        Ok(summary)
    }
}

fn print_summary(format: OutputFormat, summary: &RunSummary) -> Result<(), CliError> {
    match format {
        OutputFormat::Human => {
            println!("Replication complete");
            println!("  Requests: {}", summary.requests);
            println!("  Jobs completed: {}", summary.completed);
            println!("  Upserts: {}", summary.upserts);
        }
        OutputFormat::Json => {
            let rendered = serde_json::to_string(summary)
                .map_err(|e| CliError::OutputError(e.to_string()))?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message("Replicating");
    pb
}
