//! Default HTTP client
//!
//! Provides the `reqwest`-backed [`ApiClient`] with:
//! - Retry with exponential backoff on network errors, 5xx and 429
//! - A fresh rate limiter token per retry attempt
//! - Per-attempt metrics

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, Url};
use tracing::{debug, warn};

use crate::fetcher::{ApiClient, FetchError, FetchResult};
use crate::metrics::{self, FetchMetrics};
use crate::pipeline::config::{calculate_backoff, MAX_RETRIES};
use crate::pipeline::rate_limit::RateLimiter;

/// `reqwest`-backed API client
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: Client,
    max_retries: u32,
}

impl HttpApiClient {
    /// Wrap a configured `reqwest` client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_retries: MAX_RETRIES,
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Maximum number of retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn backoff(&self, attempt: u32) {
        let backoff = calculate_backoff(attempt);
        metrics::record_retry_backoff(backoff, attempt + 1);
        debug!("Retrying after {:?}", backoff);
        tokio::time::sleep(backoff).await;
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    /// Retries on:
    /// - Network errors (timeout, connection refused)
    /// - 5xx server errors
    /// - 429 rate limit errors
    ///
    /// Does not retry on other 4xx client errors.
    async fn fetch(
        &self,
        method: &Method,
        url: &Url,
        rate_limiter: &RateLimiter,
    ) -> FetchResult<Bytes> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                rate_limiter.acquire().await;
            }

            let request_metrics = FetchMetrics::start(url.path(), attempt);
            let response = match self.client.request(method.clone(), url.clone()).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    request_metrics.record_network_error();
                    warn!(
                        "Network error on attempt {}/{}: {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    last_error = Some(FetchError::NetworkError(e.to_string()));

                    if attempt < self.max_retries {
                        self.backoff(attempt).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            request_metrics.record_complete(status.as_u16());

            if status.as_u16() == 429 {
                last_error = Some(FetchError::RateLimitExceeded);

                if attempt < self.max_retries {
                    self.backoff(attempt).await;
                    continue;
                }
                break;
            }

            if status.is_server_error() {
                warn!(
                    "Server error {} on attempt {}/{}",
                    status,
                    attempt + 1,
                    self.max_retries + 1
                );
                last_error = Some(FetchError::HttpError(format!("Server error: {status}")));

                if attempt < self.max_retries {
                    self.backoff(attempt).await;
                    continue;
                }
                break;
            }

            if status.is_client_error() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(FetchError::ClientError {
                    status: status.as_u16(),
                    url: url.to_string(),
                    body,
                });
            }

            return response
                .bytes()
                .await
                .map_err(|e| FetchError::InvalidResponse(format!("Failed to read body: {e}")));
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::NetworkError("All retries exhausted".to_string())))
    }
}
