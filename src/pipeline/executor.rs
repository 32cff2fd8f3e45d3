//! Pipeline orchestrator
//!
//! [`Pipeline`] owns one run: it validates the config, builds the client and
//! storage targets, flattens the requests, then wires the fetch and storage
//! pools together with bounded queues and waits for one completion per
//! request. The first per-job error cancels the run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn, Instrument};

use crate::config::{ConfigError, PipelineConfig};
use crate::fetcher::{Connector, HttpConnector};
use crate::metrics::RunMetrics;
use crate::pipeline::completion::CompletionGroup;
use crate::pipeline::config::SHUTDOWN_GRACE_SECS;
use crate::pipeline::fetch::FetchWorker;
use crate::pipeline::rate_limit::RateLimiter;
use crate::pipeline::store::StoreWorker;
use crate::pipeline::{PipelineError, PipelineResult, RunState, RunSummary};
use crate::request::{flatten_all, FlattenedRequest};
use crate::shutdown::{CancelSignal, SharedCancel};
use crate::storage::{DefaultResolver, Repository, RepositoryResolver};
use crate::transform::{TableResolver, TransformRegistry};

/// Snapshot passed to progress callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    /// Jobs replicated so far
    pub completed: usize,
    /// Jobs in the run
    pub expected: usize,
}

/// Called by storage workers after every completed job
pub type ProgressCallback = Arc<dyn Fn(RunProgress) + Send + Sync>;

/// Run with the default connector, resolver and transforms.
pub async fn run_pipeline(config: PipelineConfig) -> PipelineResult<RunSummary> {
    Pipeline::new(config).run().await
}

fn transition(state: RunState) {
    info!(state = %state, "Pipeline state changed");
}

fn check_join(joined: Result<(), JoinError>) -> PipelineResult<()> {
    joined.map_err(|e| PipelineError::WorkerPanic(e.to_string()))
}

/// A configured pipeline run
pub struct Pipeline {
    config: PipelineConfig,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn RepositoryResolver>,
    registry: Arc<TransformRegistry>,
    cancel: SharedCancel,
    progress: Option<ProgressCallback>,
}

impl Pipeline {
    /// Create a run using the `reqwest` connector, the built-in storage
    /// schemes and the built-in transforms.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            connector: Arc::new(HttpConnector::new()),
            resolver: Arc::new(DefaultResolver::new()),
            registry: Arc::new(TransformRegistry::builtin()),
            cancel: CancelSignal::shared(),
            progress: None,
        }
    }

    /// Replace the connector
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replace the storage target resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn RepositoryResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the transform registry
    pub fn with_registry(mut self, registry: TransformRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Use an externally owned cancellation signal
    pub fn with_cancel(mut self, cancel: SharedCancel) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report progress after every completed job
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Signal that cancels this run
    pub fn cancel_handle(&self) -> SharedCancel {
        self.cancel.clone()
    }

    /// Config this run was built from
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn rate_limiter(&self) -> PipelineResult<Arc<RateLimiter>> {
        let spec = self
            .config
            .rate_limit
            .as_ref()
            .ok_or(ConfigError::MissingField("rate_limit", "PipelineConfig"))?;
        Ok(Arc::new(RateLimiter::from_spec(spec)?))
    }

    /// Validate and flatten without any I/O.
    pub fn plan(&self) -> PipelineResult<Vec<FlattenedRequest>> {
        self.config.validate()?;
        let rate_limiter = self.rate_limiter()?;
        Ok(flatten_all(
            &self.config.requests,
            &self.config.url,
            &rate_limiter,
        )?)
    }

    /// Execute the run, blocking until it completes or fails.
    pub async fn run(self) -> PipelineResult<RunSummary> {
        let span = tracing::info_span!("run_pipeline", url = %self.config.url);
        let metrics = RunMetrics::start(&self.config.url);

        let result = async {
            let result = self.execute().await;
            if result.is_err() {
                transition(RunState::Failed);
            }
            result
        }
        .instrument(span)
        .await;
        match &result {
            Ok(summary) => metrics.record_success(summary.completed, summary.upserts),
            Err(e) => metrics.record_failure(&e.to_string()),
        }
        result
    }

    async fn execute(self) -> PipelineResult<RunSummary> {
        transition(RunState::Validating);
        self.config.validate()?;
        let rate_limiter = self.rate_limiter()?;

        transition(RunState::Connecting);
        let client = self
            .connector
            .connect(&self.config.url, &self.config.authentication)
            .await?;
        let mut targets: Vec<Arc<dyn Repository>> = Vec::with_capacity(self.config.dns_list.len());
        for identifier in &self.config.dns_list {
            targets.push(self.resolver.resolve(identifier).await?);
        }
        info!(targets = targets.len(), "Storage targets resolved");

        transition(RunState::Flattening);
        let requests = flatten_all(&self.config.requests, &self.config.url, &rate_limiter)?;
        let expected = requests.len();
        info!(requests = expected, "Requests flattened");

        transition(RunState::Running);
        let capacity = self.config.queue_capacity;
        let fetch_workers = self.config.fetch_workers();
        let storage_workers = self.config.storage_workers();

        let (job_tx, job_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let completion = Arc::new(CompletionGroup::new(expected));
        let upserts = Arc::new(AtomicUsize::new(0));

        let mut run = RunHandles {
            fetchers: JoinSet::new(),
            storers: JoinSet::new(),
            error_rx,
            completion: completion.clone(),
            cancel: self.cancel.clone(),
        };

        FetchWorker::new(
            client,
            Arc::new(Mutex::new(job_rx)),
            result_tx,
            error_tx.clone(),
            self.cancel.clone(),
        )
        .spawn_pool(&mut run.fetchers, fetch_workers);

        StoreWorker::new(
            TableResolver::new(self.registry.clone()),
            Arc::new(targets),
            self.config.truncate,
            Arc::new(Mutex::new(result_rx)),
            error_tx,
            completion.clone(),
            upserts.clone(),
            self.cancel.clone(),
        )
        .with_progress(self.progress.clone())
        .spawn_pool(&mut run.storers, storage_workers);

        info!(
            fetch_workers,
            storage_workers,
            queue_capacity = capacity,
            "Worker pools started"
        );

        let outcome = match run.dispatch(requests, job_tx).await {
            Ok(()) => {
                transition(RunState::Draining);
                run.drain().await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                run.join().await?;
                transition(RunState::Completed);
                Ok(RunSummary {
                    requests: expected,
                    completed: completion.completed(),
                    upserts: upserts.load(Ordering::SeqCst),
                })
            }
            Err(e) => {
                error!(error = %e, "Run failed, cancelling outstanding work");
                self.cancel.cancel();
                run.shutdown().await;
                Err(e)
            }
        }
    }
}

/// Worker sets and channels the orchestrator watches during a run
struct RunHandles {
    fetchers: JoinSet<()>,
    storers: JoinSet<()>,
    error_rx: mpsc::UnboundedReceiver<PipelineError>,
    completion: Arc<CompletionGroup>,
    cancel: SharedCancel,
}

impl RunHandles {
    /// Enqueue every request. Dropping `job_tx` afterwards closes the queue.
    async fn dispatch(
        &mut self,
        requests: Vec<FlattenedRequest>,
        job_tx: mpsc::Sender<FlattenedRequest>,
    ) -> PipelineResult<()> {
        for request in requests {
            let mut request = Some(request);
            while let Some(pending) = request.take() {
                tokio::select! {
                    biased;
                    Some(err) = self.error_rx.recv() => return Err(err),
                    _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                    Some(joined) = self.fetchers.join_next() => {
                        check_join(joined)?;
                        request = Some(pending);
                    }
                    Some(joined) = self.storers.join_next() => {
                        check_join(joined)?;
                        request = Some(pending);
                    }
                    sent = job_tx.reserve() => {
                        sent.map_err(|_| {
                            PipelineError::WorkerPanic("fetch queue closed".to_string())
                        })?
                        .send(pending);
                    }
                }
            }
        }
        Ok(())
    }

    /// Wait for every job to complete or for the first failure.
    async fn drain(&mut self) -> PipelineResult<()> {
        loop {
            tokio::select! {
                biased;
                Some(err) = self.error_rx.recv() => return Err(err),
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = self.completion.wait() => return Ok(()),
                Some(joined) = self.fetchers.join_next() => check_join(joined)?,
                Some(joined) = self.storers.join_next() => {
                    check_join(joined)?;
                    if self.storers.is_empty() && !self.completion.is_done() {
                        if let Ok(err) = self.error_rx.try_recv() {
                            return Err(err);
                        }
                        return Err(PipelineError::WorkerPanic(format!(
                            "storage workers exited after {} of {} jobs",
                            self.completion.completed(),
                            self.completion.expected()
                        )));
                    }
                }
            }
        }
    }

    /// Wait for both pools to exit after a successful drain.
    async fn join(&mut self) -> PipelineResult<()> {
        while let Some(joined) = self.fetchers.join_next().await {
            check_join(joined)?;
        }
        while let Some(joined) = self.storers.join_next().await {
            check_join(joined)?;
        }
        Ok(())
    }

    /// Give cancelled workers a grace period, then abort the rest.
    async fn shutdown(&mut self) {
        let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
        let wound_down = tokio::time::timeout(grace, async {
            while self.fetchers.join_next().await.is_some() {}
            while self.storers.join_next().await.is_some() {}
        })
        .await;

        if wound_down.is_err() {
            warn!("Workers did not stop within grace period, aborting");
            self.fetchers.abort_all();
            self.storers.abort_all();
            while self.fetchers.join_next().await.is_some() {}
            while self.storers.join_next().await.is_some() {}
        }
    }
}
