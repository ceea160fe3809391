//! Connection pool implementation

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use relief_core::{Connection, ReliefError, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::PoolConfig;
use super::lease::PooledConnection;
use super::reaper::{IdleReaper, ReapReport};
use super::stats::{PoolStats, utilization_pct};
use crate::health::{HealthCheckConfig, HealthChecker};

/// Stand-in deadline distance for acquire timeouts that overflow `Instant`
const UNBOUNDED_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Factory trait for creating new connections
///
/// `create` must hand back a connection that is ready for use. The pool
/// bounds every call with its connect timeout.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }
}

/// A connection together with the metadata the pool tracks for it
pub(crate) struct PooledSlot {
    pub(crate) id: u64,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

impl PooledSlot {
    fn new(id: u64, connection: Arc<dyn Connection>) -> Self {
        let now = Instant::now();
        Self {
            id,
            connection,
            created_at: now,
            last_used_at: now,
        }
    }

    fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Close the underlying connection.
    ///
    /// Never fails: a close error is logged and the connection is dropped
    /// regardless, since there is nothing useful a caller could do with it.
    pub(crate) async fn close(self) {
        if let Err(e) = self.connection.close().await {
            tracing::warn!(
                connection_id = self.id,
                age_secs = self.created_at.elapsed().as_secs(),
                error = %e,
                "failed to close connection"
            );
        }
    }
}

/// Counters and the idle set, all guarded by one lock
pub(crate) struct PoolState {
    pub(crate) idle: VecDeque<PooledSlot>,
    /// Leased connections plus reservations for connections being opened
    pub(crate) active: usize,
    pub(crate) waiting: usize,
    pub(crate) shutdown: bool,
    pub(crate) total_created: u64,
    pub(crate) total_destroyed: u64,
}

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    health: HealthChecker,
    pub(crate) state: Mutex<PoolState>,
    /// Signalled whenever capacity frees up (release, destroy, shutdown)
    available: Notify,
    next_id: AtomicU64,
    cancel: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

enum Step {
    Reuse(PooledSlot),
    Open,
    Wait,
}

/// Decrements the waiter count when an `acquire` stops waiting, including
/// when its future is dropped mid-wait.
struct WaitingGuard<'a>(&'a PoolInner);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.waiting = state.waiting.saturating_sub(1);
    }
}

impl PoolInner {
    /// Open a connection through the factory, bounded by the connect timeout.
    async fn open_connection(&self) -> Result<PooledSlot> {
        let timeout = self.config.connect_timeout();
        let connection = match tokio::time::timeout(timeout, self.factory.create()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e @ ReliefError::ConnectFailure { .. })) => return Err(e),
            Ok(Err(e)) => return Err(ReliefError::connect(e.to_string())),
            Err(_) => {
                return Err(ReliefError::connect_timeout(format!(
                    "connect timed out after {:?}",
                    timeout
                )));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.lock().total_created += 1;
        tracing::debug!(connection_id = id, "opened connection");
        Ok(PooledSlot::new(id, connection))
    }

    /// Give back a reservation taken for a connection that was never opened.
    fn cancel_reservation(&self) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.available.notify_one();
    }

    /// Remove a leased (or reserved) connection from tracking and close it.
    pub(crate) async fn destroy(&self, slot: PooledSlot, reason: &'static str) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            state.total_destroyed += 1;
        }
        self.available.notify_one();
        tracing::debug!(connection_id = slot.id, reason, "destroying connection");
        slot.close().await;
    }

    /// Drop a leased connection without awaiting its close. Used when a lease
    /// is dropped outside of any async runtime.
    pub(crate) fn discard_detached(&self, slot: PooledSlot) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            state.total_destroyed += 1;
        }
        self.available.notify_one();
        tracing::debug!(
            connection_id = slot.id,
            "lease dropped outside a runtime; discarding connection"
        );
    }

    /// Return a leased connection to the idle set, or destroy it if it is
    /// dead, cannot be reset, or the pool has shut down.
    pub(crate) async fn return_slot(&self, mut slot: PooledSlot) {
        if self.state.lock().shutdown {
            self.destroy(slot, "pool shut down").await;
            return;
        }

        if !self.health.check(&*slot.connection).await {
            self.destroy(slot, "failed health check on release").await;
            return;
        }

        if let Err(e) = slot.connection.reset().await {
            tracing::warn!(connection_id = slot.id, error = %e, "failed to reset connection");
            self.destroy(slot, "reset failed").await;
            return;
        }

        slot.touch();
        let max = self.config.max_connections();
        let rejected = {
            let mut state = self.state.lock();
            if state.shutdown || state.idle.len() >= max {
                Some(slot)
            } else {
                tracing::trace!(connection_id = slot.id, "connection returned to idle set");
                state.idle.push_back(slot);
                state.active = state.active.saturating_sub(1);
                None
            }
        };

        match rejected {
            Some(slot) => self.destroy(slot, "idle set rejected connection").await,
            None => self.available.notify_one(),
        }
    }

    /// Evict idle connections unused for longer than the idle timeout.
    pub(crate) async fn reap_idle(&self) -> ReapReport {
        let idle_timeout = self.config.idle_timeout();
        let max = self.config.max_connections();

        let (expired, report) = {
            let mut state = self.state.lock();
            if state.shutdown {
                return ReapReport::default();
            }

            let (expired, kept): (VecDeque<PooledSlot>, VecDeque<PooledSlot>) =
                std::mem::take(&mut state.idle)
                    .into_iter()
                    .partition(|slot| slot.idle_for() > idle_timeout);
            state.idle = kept;
            state.total_destroyed += expired.len() as u64;

            let report = ReapReport {
                evicted: expired.len(),
                remaining_idle: state.idle.len(),
                active: state.active,
                utilization_pct: utilization_pct(state.active, max),
            };
            (expired, report)
        };

        for slot in expired {
            tracing::debug!(
                connection_id = slot.id,
                idle_secs = slot.idle_for().as_secs(),
                "evicting idle connection"
            );
            slot.close().await;
        }

        report
    }

    fn exhausted(&self) -> ReliefError {
        let state = self.state.lock();
        ReliefError::PoolExhausted {
            active: state.active,
            max: self.config.max_connections(),
            waiting: state.waiting,
        }
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats::new(
            state.active,
            state.idle.len(),
            self.config.max_connections(),
            state.waiting,
            state.total_created,
            state.total_destroyed,
        )
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A bounded pool of connections to the backing store
///
/// The pool keeps between `min_connections` (best effort) and
/// `max_connections` (hard cap) connections alive, hands them out as
/// [`PooledConnection`] leases, probes them on the way out and on the way
/// back in, and evicts ones that sit idle past the idle timeout.
///
/// Cloning is cheap; all clones share the same connections. Construct one
/// pool at startup and pass it to whatever needs it.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.inner.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Build a pool, pre-populate it up to `min_connections` and start the
    /// idle reaper.
    ///
    /// Pre-population is best effort: connections that fail to open are
    /// logged and the missing capacity is filled lazily by `acquire()`.
    /// Only an invalid configuration is an error.
    pub async fn initialize<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate()?;

        let health = HealthChecker::new(HealthCheckConfig::new(
            config.health_check_probe(),
            config.health_check_timeout(),
        ));
        let max = config.max_connections();
        let reaper_interval = config.reaper_interval();

        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                factory: Arc::new(factory),
                health,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(max),
                    active: 0,
                    waiting: 0,
                    shutdown: false,
                    total_created: 0,
                    total_destroyed: 0,
                }),
                available: Notify::new(),
                next_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                reaper: Mutex::new(None),
            }),
        };

        let opened = pool.fill_to_min().await;

        let handle = IdleReaper::spawn(
            Arc::downgrade(&pool.inner),
            reaper_interval,
            pool.inner.cancel.clone(),
        );
        *pool.inner.reaper.lock() = Some(handle);

        tracing::info!(
            min_connections = pool.inner.config.min_connections(),
            max_connections = max,
            opened,
            "connection pool initialized"
        );

        Ok(pool)
    }

    /// Open connections until `min_connections` exist. Failures are logged
    /// and skipped. Returns how many connections were opened.
    async fn fill_to_min(&self) -> usize {
        let inner = &self.inner;
        let min = inner.config.min_connections();
        let max = inner.config.max_connections();
        let mut opened = 0;

        for _ in 0..min {
            {
                let mut state = inner.state.lock();
                let total = state.active + state.idle.len();
                if state.shutdown || total >= min || total >= max {
                    break;
                }
                state.active += 1;
            }

            match inner.open_connection().await {
                Ok(slot) => {
                    let leftover = {
                        let mut state = inner.state.lock();
                        state.active = state.active.saturating_sub(1);
                        if state.shutdown {
                            state.total_destroyed += 1;
                            Some(slot)
                        } else {
                            state.idle.push_back(slot);
                            None
                        }
                    };
                    inner.available.notify_one();
                    match leftover {
                        Some(slot) => slot.close().await,
                        None => opened += 1,
                    }
                }
                Err(e) => {
                    inner.cancel_reservation();
                    tracing::warn!(error = %e, "failed to pre-open connection; will open lazily");
                }
            }
        }

        opened
    }

    /// Acquire a connection, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.acquire_with_timeout(self.inner.config.acquire_timeout())
            .await
    }

    /// Acquire a connection, waiting at most `timeout`.
    ///
    /// 1. Reuse an idle connection if one passes its health check; dead ones
    ///    are destroyed and the next idle one is tried. A probe still running
    ///    at the deadline is abandoned and its connection destroyed.
    /// 2. Otherwise open a new connection if the pool is below capacity.
    /// 3. Otherwise wait for a release until `timeout` elapses, then fail
    ///    with [`ReliefError::PoolExhausted`].
    ///
    /// Fails immediately with [`ReliefError::Shutdown`] once the pool has
    /// been shut down.
    pub async fn acquire_with_timeout(&self, timeout: Duration) -> Result<PooledConnection> {
        let inner = &self.inner;
        let now = tokio::time::Instant::now();
        // Timeouts too large to represent as an instant never expire.
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + UNBOUNDED_WAIT);
        let max = inner.config.max_connections();

        loop {
            // Registered before inspecting state so a release that lands in
            // between still wakes this waiter.
            let notified = inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = inner.state.lock();
                if state.shutdown {
                    return Err(ReliefError::Shutdown);
                }
                if let Some(slot) = state.idle.pop_front() {
                    state.active += 1;
                    Step::Reuse(slot)
                } else if state.active + state.idle.len() < max {
                    state.active += 1;
                    Step::Open
                } else {
                    state.waiting += 1;
                    Step::Wait
                }
            };

            match step {
                Step::Reuse(mut slot) => {
                    let probe = inner.health.check(&*slot.connection);
                    match tokio::time::timeout_at(deadline, probe).await {
                        Ok(true) => {
                            slot.touch();
                            tracing::debug!(connection_id = slot.id, "reusing idle connection");
                            return Ok(PooledConnection::new(slot, Arc::clone(inner)));
                        }
                        Ok(false) => inner.destroy(slot, "failed health check on acquire").await,
                        Err(_) => {
                            // The probe was abandoned mid-flight, so the
                            // connection's state is unknown.
                            inner.destroy(slot, "health check outlived acquire timeout").await;
                            let err = inner.exhausted();
                            tracing::debug!(
                                error = %err,
                                ?timeout,
                                "acquire timed out during health check"
                            );
                            return Err(err);
                        }
                    }
                }
                Step::Open => {
                    let slot = match inner.open_connection().await {
                        Ok(slot) => slot,
                        Err(e) => {
                            inner.cancel_reservation();
                            return Err(e);
                        }
                    };
                    if !inner.health.check(&*slot.connection).await {
                        inner.destroy(slot, "new connection failed health check").await;
                        return Err(ReliefError::connect("new connection failed health check"));
                    }
                    return Ok(PooledConnection::new(slot, Arc::clone(inner)));
                }
                Step::Wait => {
                    let waiting = WaitingGuard(inner);
                    let woke = tokio::time::timeout_at(deadline, notified.as_mut()).await;
                    drop(waiting);
                    if woke.is_err() {
                        let err = inner.exhausted();
                        tracing::debug!(error = %err, ?timeout, "acquire timed out");
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Run `f` with a leased connection, releasing it afterwards whether `f`
    /// succeeds, fails, or panics.
    pub async fn with_connection<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut lease = self.acquire().await?;
        let result = f(lease.connection()).await;
        lease.release().await;
        result
    }

    /// Get a snapshot of the pool's counters
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Whether `shutdown()` has been called
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Whether the idle reaper task is still running
    pub fn is_reaper_running(&self) -> bool {
        self.inner
            .reaper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one reaper sweep immediately instead of waiting for the interval.
    pub async fn reap_idle(&self) -> ReapReport {
        self.inner.reap_idle().await
    }

    /// Close every idle connection and open fresh ones up to `min_connections`.
    ///
    /// Leased connections are left alone. Meant for maintenance windows:
    /// under load, callers may see extra connection churn or brief exhaustion
    /// while the idle set is rebuilt. Returns the number of connections
    /// re-opened.
    pub async fn force_cleanup(&self) -> Result<usize> {
        let drained: Vec<PooledSlot> = {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return Err(ReliefError::Shutdown);
            }
            state.total_destroyed += state.idle.len() as u64;
            state.idle.drain(..).collect()
        };

        let closed = drained.len();
        for slot in drained {
            slot.close().await;
        }

        let reopened = self.fill_to_min().await;
        tracing::info!(closed, reopened, "forced pool cleanup");
        Ok(reopened)
    }

    /// Shut the pool down.
    ///
    /// Stops the reaper, closes every idle connection and makes all current
    /// and future `acquire()` calls fail with [`ReliefError::Shutdown`].
    /// Outstanding leases stay usable; their connections are closed instead
    /// of pooled when released. Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        let drained: Vec<PooledSlot> = {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.total_destroyed += state.idle.len() as u64;
            state.idle.drain(..).collect()
        };

        self.inner.cancel.cancel();
        self.inner.available.notify_waiters();

        let closed = drained.len();
        for slot in drained {
            slot.close().await;
        }

        let reaper = self.inner.reaper.lock().take();
        if let Some(handle) = reaper {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "idle reaper task ended abnormally");
            }
        }

        let stats = self.inner.stats();
        tracing::info!(
            closed,
            outstanding_leases = stats.active(),
            "connection pool shut down"
        );
    }
}
