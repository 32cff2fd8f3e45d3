//! In-process stand-ins for the API and storage collaborators

use api_replicator::config::Authentication;
use api_replicator::fetcher::{ApiClient, ConnectionError, Connector, FetchError, FetchResult};
use api_replicator::pipeline::RateLimiter;
use api_replicator::storage::{
    DefaultResolver, Repository, RepositoryResolver, StorageError, StorageResult, UpsertAck,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use reqwest::{Method, Url};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = dyn Fn(&Url) -> FetchResult<Bytes> + Send + Sync;

/// Client answering every call with a closure
pub struct ScriptedClient {
    respond: Box<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(respond: impl Fn(&Url) -> FetchResult<Bytes> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            delay: None,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Coinbase-shaped candles, one per call, timestamped from the `start` param
    pub fn candles() -> Self {
        Self::new(|url| {
            let start = url
                .query_pairs()
                .find(|(k, _)| k == "start")
                .map(|(_, v)| v.into_owned())
                .ok_or_else(|| FetchError::InvalidResponse("no start".to_string()))?;
            let time = DateTime::parse_from_rfc3339(&start)
                .map_err(|e| FetchError::InvalidResponse(e.to_string()))?
                .timestamp();
            Ok(Bytes::from(format!(
                "[[{time}, 16500.1, 16600.2, 16550.0, 16580.5, 12.25]]"
            )))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn fetch(&self, _method: &Method, url: &Url, _: &RateLimiter) -> FetchResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(url)
    }
}

/// Connector handing out a prepared client
pub struct FakeConnector {
    client: Option<Arc<dyn ApiClient>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self {
            client: Some(client),
            connects: AtomicUsize::new(0),
        }
    }

    /// Connector that always fails with no credential strategy
    pub fn refusing() -> Self {
        Self {
            client: None,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _base_url: &str,
        _authentication: &Authentication,
    ) -> Result<Arc<dyn ApiClient>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.client
            .clone()
            .ok_or(ConnectionError::NoCredentialStrategy)
    }
}

/// Repository rejecting every upsert
pub struct FailingRepository;

#[async_trait]
impl Repository for FailingRepository {
    fn name(&self) -> &str {
        "fail://target"
    }

    async fn upsert(
        &self,
        _table: &str,
        _payload: &[u8],
        _key: &[String],
    ) -> StorageResult<UpsertAck> {
        Err(StorageError::IoError("disk full".to_string()))
    }

    async fn truncate(&self, _table: &str) -> StorageResult<()> {
        Ok(())
    }
}

/// Default resolver plus a `fail://` scheme
#[derive(Default)]
pub struct TestResolver {
    pub inner: DefaultResolver,
}

#[async_trait]
impl RepositoryResolver for TestResolver {
    async fn resolve(&self, identifier: &str) -> StorageResult<Arc<dyn Repository>> {
        if identifier.starts_with("fail://") {
            return Ok(Arc::new(FailingRepository));
        }
        self.inner.resolve(identifier).await
    }
}
