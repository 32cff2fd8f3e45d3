//! Declarative pipeline configuration
//!
//! A [`PipelineConfig`] names the remote API, the credentials used to reach
//! it, the storage targets every response is replicated into, and the list
//! of [`RequestSpec`]s to resolve into HTTP calls. Configs are read from
//! JSON or TOML files and validated before any I/O happens.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::config::DEFAULT_QUEUE_CAPACITY;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {reason}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying error
        reason: String,
    },

    /// Config file could not be parsed
    #[error("failed to parse config {path}: {reason}")]
    Parse {
        /// Path that was parsed
        path: String,
        /// Underlying error
        reason: String,
    },

    /// File extension is neither json nor toml
    #[error("unsupported config format: {0} (expected .json or .toml)")]
    UnsupportedFormat(String),

    /// A required field is absent
    #[error("{0:?} is a required field on {1}")]
    MissingField(&'static str, &'static str),

    /// A field is present but invalid
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// API key credential material.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey {
    /// Public key
    pub key: String,
    /// Passphrase, sent alongside the key when set
    #[serde(default)]
    pub passphrase: String,
    /// Header carrying the key (defaults to `X-API-KEY`)
    #[serde(default)]
    pub header: Option<String>,
    /// Header carrying the passphrase (defaults to `X-API-PASSPHRASE`)
    #[serde(default)]
    pub passphrase_header: Option<String>,
}

/// Credential strategies for reaching the API.
///
/// Strategies are tried in field order; the first one configured wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Authentication {
    /// Key/passphrase headers
    #[serde(default, alias = "apiKey")]
    pub api_key: Option<ApiKey>,
    /// Bearer token
    #[serde(default)]
    pub bearer: Option<String>,
    /// Explicitly allow unauthenticated access
    #[serde(default)]
    pub anonymous: bool,
}

/// Token bucket settings shared by every request of a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitSpec {
    /// Requests allowed per period, and the bucket capacity
    pub burst: Option<u32>,
    /// Refill period in seconds
    pub period: Option<u64>,
}

impl RateLimitSpec {
    /// Build a fully populated spec.
    pub fn new(burst: u32, period_secs: u64) -> Self {
        Self {
            burst: Some(burst),
            period: Some(period_secs),
        }
    }

    /// Validate that both fields are set and positive.
    pub fn validate(&self) -> Result<(u32, Duration), ConfigError> {
        let burst = self
            .burst
            .ok_or(ConfigError::MissingField("burst", "RateLimitSpec"))?;
        let period = self
            .period
            .ok_or(ConfigError::MissingField("period", "RateLimitSpec"))?;

        if burst == 0 {
            return Err(ConfigError::Invalid(
                "rate limit burst must be greater than zero".to_string(),
            ));
        }
        if period == 0 {
            return Err(ConfigError::Invalid(
                "rate limit period must be greater than zero".to_string(),
            ));
        }

        Ok((burst, Duration::from_secs(period)))
    }
}

/// Time-partitioning settings for a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeseriesSpec {
    /// Query parameter holding the range start
    #[serde(alias = "startName")]
    pub start_name: String,
    /// Query parameter holding the range end
    #[serde(alias = "endName")]
    pub end_name: String,
    /// Chunk width in seconds
    pub period: i64,
    /// `strftime` layout for the bounds; RFC3339 when unset
    #[serde(default)]
    pub layout: Option<String>,
}

impl TimeseriesSpec {
    /// Chunk width, if `period` is positive and representable.
    pub fn chunk_width(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_seconds(self.period).filter(|width| *width > chrono::Duration::zero())
    }
}

/// One declarative request against the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestSpec {
    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,
    /// Path fragment joined onto the base URL; may carry a query string
    pub endpoint: String,
    /// Static query parameters
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Optional time partitioning
    #[serde(default)]
    pub timeseries: Option<TimeseriesSpec>,
    /// Explicit destination table
    #[serde(default)]
    pub table: Option<String>,
    /// Truncate destination tables before this request's first upsert;
    /// overrides the run-wide flag when set
    #[serde(default)]
    pub truncate: Option<bool>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestSpec {
    /// Create a GET request for an endpoint.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            endpoint: endpoint.into(),
            query: BTreeMap::new(),
            timeseries: None,
            table: None,
            truncate: None,
        }
    }

    /// Add a static query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Attach timeseries partitioning.
    pub fn with_timeseries(mut self, timeseries: TimeseriesSpec) -> Self {
        self.timeseries = Some(timeseries);
        self
    }

    /// Set an explicit destination table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Override the run-wide truncate flag for this request.
    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = Some(truncate);
        self
    }

    /// Parse the configured method.
    pub fn http_method(&self) -> Result<Method, ConfigError> {
        Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| ConfigError::Invalid(format!("invalid HTTP method {:?}", self.method)))
    }
}

/// Worker pool sizes. Unset values fall back to available parallelism.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Concurrency {
    /// Fetch worker count
    #[serde(default)]
    pub fetch_workers: Option<usize>,
    /// Storage worker count
    #[serde(default)]
    pub storage_workers: Option<usize>,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Base URL of the API
    pub url: String,
    /// Credential material
    #[serde(default)]
    pub authentication: Authentication,
    /// Storage target identifiers
    #[serde(default, alias = "dnsList")]
    pub dns_list: Vec<String>,
    /// Requests to replicate
    #[serde(default)]
    pub requests: Vec<RequestSpec>,
    /// Shared rate limit
    #[serde(default, alias = "rateLimit")]
    pub rate_limit: Option<RateLimitSpec>,
    /// Truncate each table once before its first upsert
    #[serde(default)]
    pub truncate: bool,
    /// Worker pool sizes
    #[serde(default)]
    pub concurrency: Concurrency,
    /// Capacity of the fetch and storage queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl PipelineConfig {
    /// Create a config with no requests or targets.
    pub fn new(url: impl Into<String>, rate_limit: RateLimitSpec) -> Self {
        Self {
            url: url.into(),
            authentication: Authentication::default(),
            dns_list: Vec::new(),
            requests: Vec::new(),
            rate_limit: Some(rate_limit),
            truncate: false,
            concurrency: Concurrency::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Load a config from a `.json` or `.toml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: display,
                reason: e.to_string(),
            }),
            Some("toml") => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: display,
                reason: e.to_string(),
            }),
            _ => Err(ConfigError::UnsupportedFormat(display)),
        }
    }

    /// Validate everything that can be checked without I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit
            .as_ref()
            .ok_or(ConfigError::MissingField("rate_limit", "PipelineConfig"))?
            .validate()?;

        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingField("url", "PipelineConfig"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.concurrency.fetch_workers == Some(0) || self.concurrency.storage_workers == Some(0)
        {
            return Err(ConfigError::Invalid(
                "worker pool sizes must be greater than zero".to_string(),
            ));
        }

        for request in &self.requests {
            request.http_method()?;
            if let Some(timeseries) = &request.timeseries {
                if timeseries.chunk_width().is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "timeseries period {} for {:?} must be a positive number of seconds \
                         no larger than {}",
                        timeseries.period,
                        request.endpoint,
                        i64::MAX / 1000
                    )));
                }
                if timeseries.start_name == timeseries.end_name {
                    return Err(ConfigError::Invalid(format!(
                        "timeseries start and end parameters for {:?} must differ",
                        request.endpoint
                    )));
                }
            }
        }

        Ok(())
    }

    /// Fetch pool size.
    pub fn fetch_workers(&self) -> usize {
        self.concurrency.fetch_workers.unwrap_or_else(default_workers)
    }

    /// Storage pool size.
    pub fn storage_workers(&self) -> usize {
        self.concurrency
            .storage_workers
            .unwrap_or_else(default_workers)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
