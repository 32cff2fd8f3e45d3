//! Fetch/chunk/store pipeline
//!
//! A run moves through [`RunState`]s:
//!
//! 1. **Validating**: the config is checked without any I/O
//! 2. **Connecting**: an [`ApiClient`](crate::fetcher::ApiClient) is built and every storage target resolved
//! 3. **Flattening**: request specs become [`FlattenedRequest`](crate::request::FlattenedRequest)s
//! 4. **Running**: the fetch and storage pools start and requests are enqueued
//! 5. **Draining**: the orchestrator waits for one completion per request
//! 6. **Completed** or **Failed**
//!
//! # Components
//!
//! - [`executor`] - [`Pipeline`] builder and [`run_pipeline`]
//! - [`fetch`] - fetch worker pool
//! - [`store`] - storage worker pool
//! - [`rate_limit`] - shared token bucket
//! - [`completion`] - completion counting
//! - [`config`] - retry, backoff and queue constants
//!
//! The first per-job failure cancels the run and is returned to the caller.
//! Nothing in the pipeline terminates the process.

use serde::Serialize;
use std::fmt;

use crate::config::ConfigError;
use crate::fetcher::{ConnectionError, FetchError};
use crate::request::FlattenError;
use crate::storage::StorageError;
use crate::transform::EncodingError;

pub mod completion;
pub mod config;
pub mod executor;
pub mod fetch;
pub mod job;
pub mod rate_limit;
pub mod store;

pub use completion::CompletionGroup;
pub use executor::{run_pipeline, Pipeline, ProgressCallback, RunProgress};
pub use job::RawResponseJob;
pub use rate_limit::{RateLimitError, RateLimiter};

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Bad or missing configuration
    #[error("validation error: {0}")]
    Validation(#[from] ConfigError),

    /// Client could not be built
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Requests could not be flattened
    #[error("flatten error: {0}")]
    Flatten(#[from] FlattenError),

    /// Remote call failed
    #[error("fetch {url} failed: {source}")]
    Fetch {
        /// Request URL
        url: String,
        /// Underlying error
        #[source]
        source: FetchError,
    },

    /// Payload transform failed
    #[error("encoding error for {url}: {source}")]
    Encoding {
        /// Source URL of the payload
        url: String,
        /// Underlying error
        #[source]
        source: EncodingError,
    },

    /// Target resolution failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Upsert or truncate against one target failed
    #[error("upsert into {target}/{table} failed: {source}")]
    Upsert {
        /// Target name
        target: String,
        /// Destination table
        table: String,
        /// Underlying error
        #[source]
        source: StorageError,
    },

    /// Run was cancelled externally
    #[error("pipeline cancelled")]
    Cancelled,

    /// A worker task panicked or was aborted unexpectedly
    #[error("worker task failed: {0}")]
    WorkerPanic(String),
}

impl From<RateLimitError> for PipelineError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Cancelled => PipelineError::Cancelled,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Checking configuration
    Validating,
    /// Building the client and resolving targets
    Connecting,
    /// Building flattened requests
    Flattening,
    /// Pools running, requests being enqueued
    Running,
    /// Waiting for outstanding jobs
    Draining,
    /// Every job replicated
    Completed,
    /// Run stopped on the first error
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Validating => "validating",
            RunState::Connecting => "connecting",
            RunState::Flattening => "flattening",
            RunState::Running => "running",
            RunState::Draining => "draining",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    /// Flattened requests
    pub requests: usize,
    /// Jobs replicated into every target
    pub completed: usize,
    /// Upsert calls made across all targets
    pub upserts: usize,
}
