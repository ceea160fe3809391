//! Retry coordinator with aggregate request statistics

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use relief_core::{Connection, ReliefError, Result};
use serde::{Deserialize, Serialize};

use super::BackoffStrategy;
use crate::pool::ConnectionPool;

/// Configuration for retrying transient pool errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = never retry)
    max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    base_delay_ms: u64,
    /// Cap on a single delay
    max_delay_ms: u64,
    /// Spread delays by up to ±25%
    jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff strategy described by this configuration
    pub fn backoff(&self) -> BackoffStrategy {
        BackoffStrategy::new(self.base_delay_ms, self.max_delay_ms).with_jitter(self.jitter)
    }
}

impl Default for RetryConfig {
    /// 3 retries starting at 500ms
    fn default() -> Self {
        Self::new(3, 500)
    }
}

/// Aggregate statistics for operations run through a [`RetryCoordinator`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStats {
    /// Operations currently in flight
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub retry_attempts: u64,
    /// Percentage of requests that did not fail (100.0 before any request)
    pub success_rate: f64,
}

/// Counts an operation as in flight for as long as it is alive.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs operations against the pool with bounded retry on transient errors.
///
/// Only [`ReliefError::is_transient`] errors are retried. Once retries run
/// out the caller gets a single [`ReliefError::RetriesExhausted`] carrying
/// the pool's occupancy at that moment and the last error as its source.
pub struct RetryCoordinator {
    pool: ConnectionPool,
    config: RetryConfig,
    backoff: BackoffStrategy,
    in_flight: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    retry_attempts: AtomicU64,
}

impl RetryCoordinator {
    pub fn new(pool: ConnectionPool, config: RetryConfig) -> Self {
        let backoff = config.backoff();
        Self {
            pool,
            config,
            backoff,
            in_flight: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            retry_attempts: AtomicU64::new(0),
        }
    }

    /// Create a coordinator that can be shared across tasks.
    pub fn shared(pool: ConnectionPool, config: RetryConfig) -> Arc<Self> {
        Arc::new(Self::new(pool, config))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying it after a backoff delay while it fails with
    /// a transient error and retries remain.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight);
        let mut attempt = 0u32;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                self.failed_requests.fetch_add(1, Ordering::SeqCst);
                return Err(err);
            }

            if attempt >= self.config.max_retries {
                self.failed_requests.fetch_add(1, Ordering::SeqCst);
                let stats = self.pool.stats();
                tracing::warn!(
                    attempts = attempt + 1,
                    active = stats.active(),
                    max = stats.max(),
                    error = %err,
                    "giving up after transient pool errors"
                );
                return Err(ReliefError::RetriesExhausted {
                    attempts: attempt + 1,
                    active: stats.active(),
                    max: stats.max(),
                    source: Box::new(err),
                });
            }

            let delay = self.backoff.calculate_delay(attempt);
            self.retry_attempts.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient pool error; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Run `f` on a pooled connection, retrying transient errors.
    ///
    /// `f` may run more than once, so it must be safe to repeat.
    pub async fn with_connection<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: Fn(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute(|| self.pool.with_connection(&f)).await
    }

    /// Get a snapshot of the request counters
    pub fn stats(&self) -> RetryStats {
        let total_requests = self.total_requests.load(Ordering::SeqCst);
        let failed_requests = self.failed_requests.load(Ordering::SeqCst);
        let success_rate = if total_requests == 0 {
            100.0
        } else {
            (total_requests - failed_requests) as f64 / total_requests as f64 * 100.0
        };

        RetryStats {
            active_connections: self.in_flight.load(Ordering::SeqCst),
            total_requests,
            failed_requests,
            retry_attempts: self.retry_attempts.load(Ordering::SeqCst),
            success_rate,
        }
    }
}
