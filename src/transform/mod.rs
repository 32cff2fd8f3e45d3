//! Table resolution and payload transforms
//!
//! Every raw response is routed to a destination table before storage:
//!
//! 1. An explicit table on the originating request wins.
//! 2. Otherwise the last path segment of the source URL is used.
//!
//! A [`TransformRegistry`] may then hold a [`PayloadTransform`] for the
//! resolved `(host, table)` pair which rewrites both the table name and the
//! payload. Without a registered transform the body passes through untouched.

use bytes::Bytes;
use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::pipeline::job::RawResponseJob;

pub mod coinbase;

pub use coinbase::CoinbaseCandles;

/// Payload transform errors
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// URL has no path segment to name a table after
    #[error("cannot derive a table name from {url}")]
    MissingTable {
        /// Source URL
        url: String,
    },

    /// URL lacks a segment the transform depends on
    #[error("{url} has no {segment} path segment")]
    MissingPathSegment {
        /// Source URL
        url: String,
        /// Segment the transform looked for
        segment: &'static str,
    },

    /// Payload could not be decoded
    #[error("failed to decode {table} payload: {reason}")]
    Decode {
        /// Table being transformed
        table: String,
        /// What went wrong
        reason: String,
    },

    /// Transformed records could not be re-encoded
    #[error("failed to encode {table} payload: {reason}")]
    Encode {
        /// Table being transformed
        table: String,
        /// What went wrong
        reason: String,
    },
}

/// Destination table and bytes to store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPayload {
    /// Destination table
    pub table: String,
    /// Encoded payload
    pub payload: Bytes,
    /// Fields identifying a record; empty falls back to `id` or the whole record
    pub key: Vec<String>,
}

/// Rewrites a response for one `(host, table)` pair.
pub trait PayloadTransform: Send + Sync {
    /// Produce the final table and payload for a response fetched from `url`.
    fn transform(
        &self,
        url: &Url,
        table: &str,
        payload: &Bytes,
    ) -> Result<ResolvedPayload, EncodingError>;
}

struct Registration {
    host_pattern: String,
    table: String,
    transform: Arc<dyn PayloadTransform>,
}

impl Registration {
    fn matches(&self, host: &str, table: &str) -> bool {
        table == self.table && host_matches(&self.host_pattern, host)
    }
}

/// `true` if `host` is `pattern` or a subdomain of it.
pub fn host_matches(pattern: &str, host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    host == pattern || host.ends_with(&format!(".{pattern}"))
}

/// Transforms keyed by host pattern and table name
#[derive(Default)]
pub struct TransformRegistry {
    registrations: Vec<Registration>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.registrations
                    .iter()
                    .map(|r| (r.host_pattern.as_str(), r.table.as_str())),
            )
            .finish()
    }
}

impl TransformRegistry {
    /// Registry without any transforms
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in transforms
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("coinbase.com", "candles", Arc::new(CoinbaseCandles));
        registry
    }

    /// Register a transform. Earlier registrations take precedence.
    pub fn register(
        &mut self,
        host_pattern: impl Into<String>,
        table: impl Into<String>,
        transform: Arc<dyn PayloadTransform>,
    ) -> &mut Self {
        self.registrations.push(Registration {
            host_pattern: host_pattern.into(),
            table: table.into(),
            transform,
        });
        self
    }

    /// Transform registered for `(host, table)`, if any
    pub fn lookup(&self, host: &str, table: &str) -> Option<&Arc<dyn PayloadTransform>> {
        self.registrations
            .iter()
            .find(|r| r.matches(host, table))
            .map(|r| &r.transform)
    }

    /// Number of registered transforms
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether no transform is registered
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

/// Last non-empty path segment of `url`
pub fn default_table(url: &Url) -> Result<String, EncodingError> {
    url.path()
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EncodingError::MissingTable {
            url: url.to_string(),
        })
}

/// Resolves destination tables and applies registered transforms
#[derive(Debug, Clone)]
pub struct TableResolver {
    registry: Arc<TransformRegistry>,
}

impl Default for TableResolver {
    fn default() -> Self {
        Self::new(Arc::new(TransformRegistry::builtin()))
    }
}

impl TableResolver {
    /// Create a resolver over `registry`
    pub fn new(registry: Arc<TransformRegistry>) -> Self {
        Self { registry }
    }

    /// Table a job would land in before any transform runs
    pub fn table_for(&self, job: &RawResponseJob) -> Result<String, EncodingError> {
        match job.table() {
            Some(table) => Ok(table.to_string()),
            None => default_table(job.url()),
        }
    }

    /// Resolve the destination table and encode the payload.
    pub fn resolve(&self, job: &RawResponseJob) -> Result<ResolvedPayload, EncodingError> {
        let table = self.table_for(job)?;
        let host = job.url().host_str().unwrap_or_default();

        match self.registry.lookup(host, &table) {
            Some(transform) => {
                debug!(host, table = %table, "Applying payload transform");
                transform.transform(job.url(), &table, job.body())
            }
            None => Ok(ResolvedPayload {
                table,
                payload: job.body().clone(),
                key: Vec::new(),
            }),
        }
    }
}
