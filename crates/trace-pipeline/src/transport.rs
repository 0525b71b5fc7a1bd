//! Resilient transport wrapper.
//!
//! [`RetryingTransport`] decorates any base [`BatchSender`] with bounded
//! retry, exponential backoff, and full jitter. Classification of what is
//! worth retrying lives on [`SendError::is_retryable`]; this module only
//! decides *when* the next attempt happens.

use crate::exporter::{BatchSender, SendError};
use crate::span::SpanBatch;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Backoff ceiling for the first retry (attempt 1). The actual sleep
    /// is jittered below this.
    pub initial_backoff: Duration,
    /// Maximum backoff ceiling (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = double each retry).
    pub backoff_multiplier: f64,
    /// Total attempts, including the initial one. Must be at least 1.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

// =============================================================================
// SLEEPER SEAM
// =============================================================================

/// Async sleep abstraction so tests can capture requested backoff
/// durations instead of actually waiting.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// RETRYING TRANSPORT
// =============================================================================

/// A sender wrapper that retries transient failures with jittered
/// exponential backoff.
///
/// Attempt 0 is sent immediately. Before attempt n > 0 the transport
/// sleeps a uniformly random duration in `[0, min(backoff, max_backoff)]`
/// ("full jitter" — decorrelates retry storms from many processes that
/// failed at the same moment), then multiplies the backoff ceiling.
/// Non-retryable errors return immediately without consuming attempts.
///
/// Sleeps run on the tokio timer and are cancellation points: dropping the
/// future (e.g. an enclosing `tokio::time::timeout`) stops the retry loop.
pub struct RetryingTransport<S: BatchSender, Sl: Sleeper = TokioSleeper> {
    inner: S,
    policy: RetryPolicy,
    sleeper: Sl,
    /// Metrics: total retry attempts made
    total_retries: AtomicU64,
    /// Metrics: sends that succeeded after at least one retry
    recovered_sends: AtomicU64,
}

impl<S: BatchSender> RetryingTransport<S> {
    /// Create a new retrying transport with the given policy.
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self::with_sleeper(inner, policy, TokioSleeper)
    }

    /// Create with the default retry policy.
    pub fn with_defaults(inner: S) -> Self {
        Self::new(inner, RetryPolicy::default())
    }
}

impl<S: BatchSender, Sl: Sleeper> RetryingTransport<S, Sl> {
    /// Create with an explicit sleeper (tests inject a recording fake).
    pub fn with_sleeper(inner: S, policy: RetryPolicy, sleeper: Sl) -> Self {
        assert!(policy.max_attempts >= 1, "max_attempts must be at least 1");
        Self {
            inner,
            policy,
            sleeper,
            total_retries: AtomicU64::new(0),
            recovered_sends: AtomicU64::new(0),
        }
    }

    /// Returns the total number of retry attempts made.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Returns sends that succeeded after at least one retry.
    pub fn recovered_sends(&self) -> u64 {
        self.recovered_sends.load(Ordering::Relaxed)
    }

    /// Access the wrapped sender.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Next backoff ceiling, saturating at `max_backoff` so repeated
    /// multiplication cannot overflow `Duration` for large attempt counts.
    fn next_ceiling(&self, ceiling: Duration) -> Duration {
        let max = self.policy.max_backoff;
        if ceiling >= max {
            return max;
        }
        let next = ceiling.as_secs_f64() * self.policy.backoff_multiplier;
        if (0.0..max.as_secs_f64()).contains(&next) {
            Duration::from_secs_f64(next)
        } else {
            max
        }
    }

    fn jittered(&self, ceiling: Duration) -> Duration {
        let capped = ceiling.min(self.policy.max_backoff);
        if capped.is_zero() {
            return Duration::ZERO;
        }
        let nanos = rand::thread_rng().gen_range(0..=capped.as_nanos());
        // Cap fits in u64: max_backoff beyond ~584 years is nonsensical.
        Duration::from_nanos(nanos as u64)
    }
}

impl<S: BatchSender, Sl: Sleeper> BatchSender for RetryingTransport<S, Sl> {
    async fn send(&self, batch: SpanBatch) -> Result<(), SendError> {
        let mut backoff = self.policy.initial_backoff;
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let delay = self.jittered(backoff);
                backoff = self.next_ceiling(backoff);
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                self.sleeper.sleep(delay).await;
            }

            match self.inner.send(batch.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        self.recovered_sends.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            sender = self.inner.name(),
                            attempt,
                            "send recovered after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        sender = self.inner.name(),
                        attempt,
                        error = %e,
                        "retryable send failure"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // max_attempts >= 1, so at least one attempt ran and recorded its error.
        let last = last_error.unwrap_or_else(|| SendError::Transport("no attempts made".into()));
        Err(SendError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last: Box::new(last),
        })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
