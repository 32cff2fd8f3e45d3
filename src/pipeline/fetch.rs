//! Fetch worker pool
//!
//! Fixed-size pool of tasks draining the shared fetch queue. Each worker
//! takes a token from the request's limiter, calls the [`ApiClient`], and
//! hands the body to the storage pool. Failures are reported on the error
//! channel and the worker moves on to the next request.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::fetcher::ApiClient;
use crate::pipeline::job::RawResponseJob;
use crate::pipeline::{PipelineError, PipelineResult};
use crate::request::FlattenedRequest;
use crate::shutdown::SharedCancel;

/// Receiver shared by every worker in a pool
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Take the next item from a shared queue unless the run is cancelled.
pub(crate) async fn next_job<T>(jobs: &SharedReceiver<T>, cancel: &SharedCancel) -> Option<T> {
    let mut receiver = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        guard = jobs.lock() => guard,
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        job = receiver.recv() => job,
    }
}

/// State cloned into every fetch worker
#[derive(Clone)]
pub struct FetchWorker {
    client: Arc<dyn ApiClient>,
    jobs: SharedReceiver<FlattenedRequest>,
    results: mpsc::Sender<RawResponseJob>,
    errors: mpsc::UnboundedSender<PipelineError>,
    cancel: SharedCancel,
}

impl FetchWorker {
    /// Create a worker template
    pub fn new(
        client: Arc<dyn ApiClient>,
        jobs: SharedReceiver<FlattenedRequest>,
        results: mpsc::Sender<RawResponseJob>,
        errors: mpsc::UnboundedSender<PipelineError>,
        cancel: SharedCancel,
    ) -> Self {
        Self {
            client,
            jobs,
            results,
            errors,
            cancel,
        }
    }

    /// Spawn `workers` copies onto `set`.
    ///
    /// The results queue closes once every spawned worker has exited.
    pub fn spawn_pool(self, set: &mut JoinSet<()>, workers: usize) {
        for id in 0..workers {
            let worker = self.clone();
            set.spawn(async move { worker.run(id).await });
        }
    }

    /// Fetch one request.
    pub async fn fetch(&self, request: &FlattenedRequest) -> PipelineResult<RawResponseJob> {
        request
            .rate_limiter()
            .acquire_or_cancel(&self.cancel)
            .await?;

        let body = self
            .client
            .fetch(request.method(), request.url(), request.rate_limiter())
            .await
            .map_err(|source| PipelineError::Fetch {
                url: request.url().to_string(),
                source,
            })?;

        Ok(RawResponseJob::new(
            body,
            request.url().clone(),
            request.table().map(str::to_string),
        )
        .with_truncate(request.truncate()))
    }

    async fn run(self, id: usize) {
        debug!(worker = id, "Fetch worker started");

        while let Some(request) = next_job(&self.jobs, &self.cancel).await {
            debug!(worker = id, request = %request, "Fetching");

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = self.fetch(&request) => outcome,
            };

            match outcome {
                Ok(job) => {
                    let sent = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        sent = self.results.send(job) => sent,
                    };
                    if sent.is_err() {
                        break;
                    }
                }
                Err(PipelineError::Cancelled) => break,
                Err(e) => {
                    warn!(worker = id, url = %request.url(), error = %e, "Fetch failed");
                    let _ = self.errors.send(e);
                }
            }
        }

        debug!(worker = id, "Fetch worker stopped");
    }
}
