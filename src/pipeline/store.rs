//! Storage worker pool
//!
//! Workers drain the results queue, resolve each response to a table and
//! payload once, then upsert it into every storage target in order. A job
//! completes only after all targets accepted it. The first failing target
//! ends the job and is reported on the error channel.
//!
//! A job truncates when its request says so, falling back to the run-wide
//! flag. Each `(target, table)` pair is truncated at most once per run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::pipeline::completion::CompletionGroup;
use crate::pipeline::executor::{ProgressCallback, RunProgress};
use crate::pipeline::fetch::{next_job, SharedReceiver};
use crate::pipeline::job::RawResponseJob;
use crate::pipeline::{PipelineError, PipelineResult};
use crate::shutdown::SharedCancel;
use crate::storage::{Repository, StorageError, StorageResult};
use crate::transform::TableResolver;

/// Tracks which tables have been truncated on each target during a run
#[derive(Debug)]
pub struct TruncateLedger {
    truncated: Vec<Mutex<HashSet<String>>>,
}

impl TruncateLedger {
    /// Ledger for `targets` storage targets
    pub fn new(targets: usize) -> Self {
        Self {
            truncated: (0..targets).map(|_| Mutex::new(HashSet::new())).collect(),
        }
    }

    /// Truncate `table` on `target` unless already done this run.
    ///
    /// The per-target lock is held across the truncate so no upsert into the
    /// same target can overtake it. Returns `true` if this call truncated.
    pub async fn ensure_truncated(
        &self,
        index: usize,
        target: &dyn Repository,
        table: &str,
    ) -> StorageResult<bool> {
        let Some(truncated) = self.truncated.get(index) else {
            return Ok(false);
        };
        let mut truncated = truncated.lock().await;
        if truncated.contains(table) {
            return Ok(false);
        }
        target.truncate(table).await?;
        truncated.insert(table.to_string());
        info!(repository = target.name(), table, "Truncated table");
        Ok(true)
    }
}

/// State cloned into every storage worker
#[derive(Clone)]
pub struct StoreWorker {
    resolver: TableResolver,
    targets: Arc<Vec<Arc<dyn Repository>>>,
    truncate: bool,
    ledger: Arc<TruncateLedger>,
    jobs: SharedReceiver<RawResponseJob>,
    errors: mpsc::UnboundedSender<PipelineError>,
    completion: Arc<CompletionGroup>,
    upserts: Arc<AtomicUsize>,
    progress: Option<ProgressCallback>,
    cancel: SharedCancel,
}

impl StoreWorker {
    /// Create a worker template
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: TableResolver,
        targets: Arc<Vec<Arc<dyn Repository>>>,
        truncate: bool,
        jobs: SharedReceiver<RawResponseJob>,
        errors: mpsc::UnboundedSender<PipelineError>,
        completion: Arc<CompletionGroup>,
        upserts: Arc<AtomicUsize>,
        cancel: SharedCancel,
    ) -> Self {
        let ledger = Arc::new(TruncateLedger::new(targets.len()));
        Self {
            resolver,
            targets,
            truncate,
            ledger,
            jobs,
            errors,
            completion,
            upserts,
            progress: None,
            cancel,
        }
    }

    /// Report progress after every completed job
    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Spawn `workers` copies onto `set`.
    pub fn spawn_pool(self, set: &mut JoinSet<()>, workers: usize) {
        for id in 0..workers {
            let worker = self.clone();
            set.spawn(async move { worker.run(id).await });
        }
    }

    /// Replicate one job into every target. Returns the number of upserts.
    ///
    /// Cancellation is checked between targets; an upsert already started
    /// is allowed to finish.
    pub async fn store(&self, job: &RawResponseJob) -> PipelineResult<usize> {
        let resolved = self
            .resolver
            .resolve(job)
            .map_err(|source| PipelineError::Encoding {
                url: job.url().to_string(),
                source,
            })?;
        let table = resolved.table.as_str();
        let truncate = job.truncate().unwrap_or(self.truncate);

        for (index, target) in self.targets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let upsert_error = |source: StorageError| PipelineError::Upsert {
                target: target.name().to_string(),
                table: table.to_string(),
                source,
            };

            if truncate {
                self.ledger
                    .ensure_truncated(index, target.as_ref(), table)
                    .await
                    .map_err(upsert_error)?;
            }

            match target.upsert(table, &resolved.payload, &resolved.key).await {
                Ok(ack) => {
                    metrics::record_upsert(target.name(), table);
                    self.upserts.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        repository = target.name(),
                        table,
                        records = ack.records,
                        inserted = ack.inserted,
                        "Upserted payload"
                    );
                }
                Err(source) => {
                    metrics::record_upsert_error(target.name(), table);
                    return Err(upsert_error(source));
                }
            }
        }

        Ok(self.targets.len())
    }

    async fn run(self, id: usize) {
        debug!(worker = id, "Storage worker started");

        while let Some(job) = next_job(&self.jobs, &self.cancel).await {
            match self.store(&job).await {
                Ok(_) => {
                    let completed = self.completion.complete();
                    metrics::record_job_completed();
                    if let Some(progress) = &self.progress {
                        progress(RunProgress {
                            completed,
                            expected: self.completion.expected(),
                        });
                    }
                }
                Err(PipelineError::Cancelled) => break,
                Err(e) => {
                    warn!(worker = id, url = %job.url(), error = %e, "Storage failed");
                    let _ = self.errors.send(e);
                }
            }
        }

        debug!(worker = id, "Storage worker stopped");
    }
}
