//! # API Replicator Library
//!
//! Replicates paginated, rate-limited data from a remote HTTP API into one or
//! more storage targets.
//!
//! ## Features
//!
//! - **Timeseries Chunking**: Time-bounded queries are split into fixed windows
//! - **Shared Rate Limiting**: One token bucket per run covers every endpoint
//! - **Concurrent Pools**: Bounded fetch and storage worker pools
//! - **Pluggable Transforms**: Host/table-specific payload rewriting
//! - **Multi-Target Replication**: Every payload is upserted into every target
//!
//! ## Quick Start
//!
//! ```no_run
//! use api_replicator::config::{PipelineConfig, RateLimitSpec, RequestSpec, TimeseriesSpec};
//! use api_replicator::run_pipeline;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = PipelineConfig::new(
//!     "https://api.exchange.coinbase.com",
//!     RateLimitSpec::new(10, 1),
//! );
//! config.authentication.anonymous = true;
//! config.dns_list = vec!["file://./data".to_string()];
//! config.requests = vec![RequestSpec::get("/products/BTC-USD/candles")
//!     .with_query("granularity", "60")
//!     .with_query("start", "2023-01-01T00:00:00Z")
//!     .with_query("end", "2023-01-02T00:00:00Z")
//!     .with_timeseries(TimeseriesSpec {
//!         start_name: "start".to_string(),
//!         end_name: "end".to_string(),
//!         period: 18000,
//!         layout: None,
//!     })];
//!
//! let summary = run_pipeline(config).await?;
//! println!("{} jobs, {} upserts", summary.completed, summary.upserts);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - Declarative pipeline configuration
//! - [`timeseries`] - Splitting time ranges into request windows
//! - [`request`] - Flattening request specs into concrete HTTP calls
//! - [`fetcher`] - Client construction and HTTP fetching
//! - [`transform`] - Table resolution and payload transforms
//! - [`storage`] - Storage targets
//! - [`pipeline`] - Worker pools and the run orchestrator

#![warn(missing_docs)]
#![warn(clippy::all)]

/// CLI command implementations
pub mod cli;

/// Pipeline configuration
pub mod config;

/// Remote API access
pub mod fetcher;

/// Metrics collection and export
pub mod metrics;

/// Fetch/chunk/store pipeline
pub mod pipeline;

/// Request flattening
pub mod request;

/// Run-scoped cancellation
pub mod shutdown;

/// Storage targets
pub mod storage;

/// Timeseries chunking
pub mod timeseries;

/// Table resolution and payload transforms
pub mod transform;

pub use config::PipelineConfig;
pub use pipeline::{run_pipeline, Pipeline, PipelineError, RunState, RunSummary};
pub use request::FlattenedRequest;
pub use shutdown::{CancelSignal, SharedCancel};
