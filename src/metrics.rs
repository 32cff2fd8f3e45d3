//! Pipeline observability metrics
//!
//! Metric collection for fetches, retries, rate limiter waits, upserts and
//! whole runs.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade; recording is a no-op until a recorder is installed
//! - [`init_metrics`] installs a Prometheus exporter with a scrape listener
//! - Every helper also emits a `tracing` event so runs are diagnosable without a recorder

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls return `Ok(())` without reinstalling.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "fetch_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the source API"
    );

    describe_histogram!(
        "fetch_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );

    describe_counter!(
        "fetch_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limiter token"
    );

    describe_gauge!(
        "rate_limit_tokens_available",
        Unit::Count,
        "Tokens left in the shared bucket after the last acquisition"
    );

    describe_counter!(
        "upserts_total",
        Unit::Count,
        "Total number of successful upserts into storage targets"
    );

    describe_counter!(
        "upsert_errors_total",
        Unit::Count,
        "Total number of failed upserts"
    );

    describe_counter!(
        "jobs_completed_total",
        Unit::Count,
        "Responses replicated into every storage target"
    );

    describe_counter!(
        "pipeline_runs_total",
        Unit::Count,
        "Pipeline runs by outcome"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing for one HTTP attempt
pub struct FetchMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl FetchMetrics {
    /// Start recording an attempt
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt = attempt,
            "Starting HTTP request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record a response with a status code
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "fetch_requests_total",
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!("fetch_duration_seconds").record(duration.as_secs_f64());

        if status_code == 429 {
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                attempt = self.attempt,
                "Rate limit error (429) from source API"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!("fetch_requests_total", "status" => "network_error").increment(1);
        histogram!("fetch_duration_seconds").record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Correlation ID for this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("fetch_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record a token acquisition and how long it waited
pub fn record_token_acquired(wait: Duration, available: u32) {
    histogram!("rate_limit_wait_seconds").record(wait.as_secs_f64());
    gauge!("rate_limit_tokens_available").set(available as f64);

    if wait.as_millis() > 100 {
        debug!(
            wait_ms = wait.as_millis(),
            available = available,
            "Rate limit token acquired after wait"
        );
    }
}

/// Record a successful upsert
pub fn record_upsert(target: &str, table: &str) {
    counter!(
        "upserts_total",
        "target" => target.to_string(),
        "table" => table.to_string(),
    )
    .increment(1);
}

/// Record a failed upsert
pub fn record_upsert_error(target: &str, table: &str) {
    counter!(
        "upsert_errors_total",
        "target" => target.to_string(),
        "table" => table.to_string(),
    )
    .increment(1);
}

/// Record a job replicated into every target
pub fn record_job_completed() {
    counter!("jobs_completed_total").increment(1);
}

/// Whole-run metrics
pub struct RunMetrics {
    url: String,
    start_time: Instant,
}

impl RunMetrics {
    /// Start tracking a run
    pub fn start(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            start_time: Instant::now(),
        }
    }

    /// Record successful completion
    pub fn record_success(&self, jobs: usize, upserts: usize) {
        counter!("pipeline_runs_total", "outcome" => "completed").increment(1);

        info!(
            url = %self.url,
            jobs = jobs,
            upserts = upserts,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Pipeline completed"
        );
    }

    /// Record a failed run
    pub fn record_failure(&self, error: &str) {
        counter!("pipeline_runs_total", "outcome" => "failed").increment(1);

        error!(
            url = %self.url,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Pipeline failed"
        );
    }
}
