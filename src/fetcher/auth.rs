//! Credential strategies and client construction
//!
//! [`HttpConnector`] turns an [`Authentication`] block into default headers
//! on a `reqwest` client. Strategies are tried in order: API key, bearer
//! token, then explicit anonymous access. If none is configured the run
//! fails with [`ConnectionError::NoCredentialStrategy`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{ApiKey, Authentication};
use crate::fetcher::{ApiClient, ConnectionError, Connector, HttpApiClient};
use crate::pipeline::config::{HTTP_CONNECT_TIMEOUT_SECS, HTTP_REQUEST_TIMEOUT_SECS, MAX_RETRIES};

const DEFAULT_KEY_HEADER: &str = "X-API-KEY";
const DEFAULT_PASSPHRASE_HEADER: &str = "X-API-PASSPHRASE";

/// Default connector building [`HttpApiClient`]s
#[derive(Debug, Clone)]
pub struct HttpConnector {
    max_retries: u32,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConnector {
    /// Create a connector with the default retry budget
    pub fn new() -> Self {
        Self {
            max_retries: MAX_RETRIES,
        }
    }

    /// Set maximum number of retries for built clients
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

fn sensitive_value(value: &str, what: &str) -> Result<HeaderValue, ConnectionError> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|e| ConnectionError::InvalidCredential(format!("{what}: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

fn header_name(name: Option<&str>, default: &str) -> Result<HeaderName, ConnectionError> {
    let name = name.unwrap_or(default);
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ConnectionError::InvalidCredential(format!("header {name:?}: {e}")))
}

fn api_key_headers(api_key: &ApiKey) -> Result<HeaderMap, ConnectionError> {
    if api_key.key.trim().is_empty() {
        return Err(ConnectionError::InvalidCredential(
            "api_key.key is empty".to_string(),
        ));
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header_name(api_key.header.as_deref(), DEFAULT_KEY_HEADER)?,
        sensitive_value(&api_key.key, "api key")?,
    );
    if !api_key.passphrase.is_empty() {
        headers.insert(
            header_name(api_key.passphrase_header.as_deref(), DEFAULT_PASSPHRASE_HEADER)?,
            sensitive_value(&api_key.passphrase, "passphrase")?,
        );
    }
    Ok(headers)
}

/// Resolve the first configured credential strategy into request headers.
pub fn credential_headers(authentication: &Authentication) -> Result<HeaderMap, ConnectionError> {
    if let Some(api_key) = &authentication.api_key {
        debug!("Using api key credential strategy");
        return api_key_headers(api_key);
    }

    if let Some(token) = &authentication.bearer {
        debug!("Using bearer credential strategy");
        if token.trim().is_empty() {
            return Err(ConnectionError::InvalidCredential(
                "bearer token is empty".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            sensitive_value(&format!("Bearer {token}"), "bearer token")?,
        );
        return Ok(headers);
    }

    if authentication.anonymous {
        debug!("Using anonymous access");
        return Ok(HeaderMap::new());
    }

    Err(ConnectionError::NoCredentialStrategy)
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(
        &self,
        base_url: &str,
        authentication: &Authentication,
    ) -> Result<Arc<dyn ApiClient>, ConnectionError> {
        Url::parse(base_url)
            .map_err(|e| ConnectionError::ClientBuild(format!("invalid base URL {base_url:?}: {e}")))?;

        let headers = credential_headers(authentication)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| ConnectionError::ClientBuild(e.to_string()))?;

        Ok(Arc::new(
            HttpApiClient::new(client).with_max_retries(self.max_retries),
        ))
    }
}
