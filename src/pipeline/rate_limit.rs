//! Shared token bucket rate limiting
//!
//! One [`RateLimiter`] is created per pipeline run and handed by `Arc` to
//! every flattened request, so concurrent calls to different endpoints still
//! draw from a single quota. The bucket holds up to `burst` tokens and
//! refills at `burst` tokens per `period`.
//!
//! Time is read through `tokio::time`, so tests can drive the bucket with a
//! paused clock.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::config::{ConfigError, RateLimitSpec};
use crate::metrics;
use crate::shutdown::CancelSignal;

/// Rate limiter errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// Cancelled while waiting for a token
    #[error("cancelled while waiting for a rate limit token")]
    Cancelled,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token bucket shared by every fetch in a run
#[derive(Debug)]
pub struct RateLimiter {
    burst: u32,
    period: Duration,
    interval: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `burst` requests per `period`.
    ///
    /// A zero `burst` is treated as one.
    pub fn new(burst: u32, period: Duration) -> Self {
        let burst = burst.max(1);
        let interval = (period / burst).max(Duration::from_nanos(1));
        Self {
            burst,
            period,
            interval,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Create a limiter from a validated config section.
    pub fn from_spec(spec: &RateLimitSpec) -> Result<Self, ConfigError> {
        let (burst, period) = spec.validate()?;
        Ok(Self::new(burst, period))
    }

    /// Bucket capacity
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Refill period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time between single-token refills
    pub fn refill_interval(&self) -> Duration {
        self.interval
    }

    /// Tokens currently available.
    pub async fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let earned = elapsed.as_nanos() / self.interval.as_nanos();
        if earned == 0 {
            return;
        }

        let total = u128::from(bucket.tokens) + earned;
        if total >= u128::from(self.burst) {
            bucket.tokens = self.burst;
            bucket.last_refill = now;
        } else {
            // total < burst, so earned fits in u32
            bucket.tokens = total as u32;
            bucket.last_refill += self.interval * earned as u32;
        }
    }

    /// Take one token, waiting for a refill if the bucket is empty.
    pub async fn acquire(&self) {
        let started = Instant::now();
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                self.refill(&mut bucket, now);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    metrics::record_token_acquired(started.elapsed(), bucket.tokens);
                    return;
                }
                let since_refill = now.saturating_duration_since(bucket.last_refill);
                self.interval.saturating_sub(since_refill)
            };
            sleep(wait.max(Duration::from_nanos(1))).await;
        }
    }

    /// Take one token unless `cancel` fires first.
    pub async fn acquire_or_cancel(&self, cancel: &CancelSignal) -> Result<(), RateLimitError> {
        if cancel.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }
        tokio::select! {
            _ = self.acquire() => Ok(()),
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
        }
    }
}
