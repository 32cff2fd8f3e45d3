//! Pipeline configuration constants

use std::time::Duration;

/// Maximum number of retries for a failed fetch.
/// 5 retries with exponential backoff rides out transient outages
/// without looping forever on a persistent failure (max total wait ~1 minute).
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Default capacity of the fetch and storage queues.
/// Producers block once a queue holds this many jobs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Time workers get to wind down after a failed run before being aborted.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// HTTP connect timeout (seconds) - time to establish TCP connection
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout (seconds) - overall time for the entire request
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}
