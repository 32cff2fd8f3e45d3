//! Jobs passed between the worker pools

use bytes::Bytes;
use reqwest::Url;

/// A fetched response waiting for storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponseJob {
    body: Bytes,
    url: Url,
    table: Option<String>,
    truncate: Option<bool>,
}

impl RawResponseJob {
    /// Create a job for a response body fetched from `url`.
    pub fn new(body: Bytes, url: Url, table: Option<String>) -> Self {
        Self {
            body,
            url,
            table,
            truncate: None,
        }
    }

    /// Carry the originating request's truncate override.
    pub fn with_truncate(mut self, truncate: Option<bool>) -> Self {
        self.truncate = truncate;
        self
    }

    /// Response body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// URL the body was fetched from
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Explicit destination table from the originating request
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Truncate override; `None` defers to the run-wide flag
    pub fn truncate(&self) -> Option<bool> {
        self.truncate
    }
}
