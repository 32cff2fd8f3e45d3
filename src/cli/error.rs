//! CLI error types and conversions

use crate::config::ConfigError;
use crate::pipeline::PipelineError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Config could not be loaded or is invalid
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Pipeline run failed
    #[error("pipeline error: {0}")]
    PipelineError(#[from] PipelineError),

    /// Metrics exporter could not start
    #[error("metrics error: {0}")]
    MetricsError(String),

    /// Output could not be rendered
    #[error("output error: {0}")]
    OutputError(String),
}
