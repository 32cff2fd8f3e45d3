//! Remote API access
//!
//! The pipeline talks to the source API through two seams:
//!
//! - [`Connector`] builds a client from credential material once per run
//! - [`ApiClient`] executes one method/URL call and returns the body bytes
//!
//! [`auth::HttpConnector`] and [`http::HttpApiClient`] are the default
//! `reqwest`-backed implementations. Tests substitute their own.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, Url};
use std::sync::Arc;

use crate::config::Authentication;
use crate::pipeline::rate_limit::RateLimiter;

pub mod auth;
pub mod http;

pub use auth::HttpConnector;
pub use http::HttpApiClient;

/// Fetch errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Server error after retries were exhausted
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Non-retryable client error response
    #[error("client error {status} from {url}: {body}")]
    ClientError {
        /// Status code
        status: u16,
        /// Requested URL
        url: String,
        /// Response body, for diagnostics
        body: String,
    },

    /// Rate limit exceeded after retries were exhausted
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Transport-level failure
    #[error("network error: {0}")]
    NetworkError(String),

    /// Body could not be read
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Client construction errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No credential strategy is configured
    #[error("no credential strategy configured (set api_key, bearer, or anonymous)")]
    NoCredentialStrategy,

    /// A configured credential cannot be used
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The underlying client failed to build
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Executes HTTP calls against the source API
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetch the body of one call.
    ///
    /// The caller already holds a token from `rate_limiter` for the first
    /// attempt. Implementations that retry must acquire a fresh token
    /// before every further attempt.
    async fn fetch(&self, method: &Method, url: &Url, rate_limiter: &RateLimiter)
        -> FetchResult<Bytes>;
}

/// Builds an [`ApiClient`] from credential material
#[async_trait]
pub trait Connector: Send + Sync {
    /// Build a client for `base_url`.
    async fn connect(
        &self,
        base_url: &str,
        authentication: &Authentication,
    ) -> Result<Arc<dyn ApiClient>, ConnectionError>;
}
