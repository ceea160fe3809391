//! In-process connection backend
//!
//! `MemoryConnectionFactory` opens connections that never touch the network.
//! It exists to exercise the pool: tests and the `relief-pool simulate`
//! command use its knobs to inject slow connects, slow statements, connect
//! failures, dead connections and failing resets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relief_core::{Connection, ReliefError, Result};

use crate::pool::ConnectionFactory;

#[derive(Default)]
struct MemoryStore {
    next_id: AtomicU64,
    created: AtomicU64,
    closed: AtomicU64,
    statements: AtomicU64,
    /// Bumped by `kill_all`; connections from an older generation are dead.
    generation: AtomicU64,
    connect_latency: Mutex<Duration>,
    statement_latency: Mutex<Duration>,
    fail_next_creates: AtomicUsize,
    fail_with_timeout: AtomicBool,
    fail_resets: AtomicBool,
}

/// Factory for [`MemoryConnection`]s
///
/// Clones share the same backing store, so a test can keep one handle to
/// steer the backend while the pool owns another.
#[derive(Clone, Default)]
pub struct MemoryConnectionFactory {
    store: Arc<MemoryStore>,
}

impl MemoryConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `create()` by `latency`
    pub fn with_connect_latency(self, latency: Duration) -> Self {
        self.set_connect_latency(latency);
        self
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        *self.store.connect_latency.lock() = latency;
    }

    /// Delay every statement, probes included, by `latency`
    pub fn set_statement_latency(&self, latency: Duration) {
        *self.store.statement_latency.lock() = latency;
    }

    /// Make the next `count` calls to `create()` fail with a refused connect
    pub fn fail_next_creates(&self, count: usize) {
        self.store.fail_with_timeout.store(false, Ordering::SeqCst);
        self.store.fail_next_creates.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `create()` fail with a connect timeout
    pub fn time_out_next_creates(&self, count: usize) {
        self.store.fail_with_timeout.store(true, Ordering::SeqCst);
        self.store.fail_next_creates.store(count, Ordering::SeqCst);
    }

    /// Sever every connection opened so far; their next statement fails
    pub fn kill_all(&self) {
        self.store.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Make `reset()` fail on every connection
    pub fn set_fail_resets(&self, fail: bool) {
        self.store.fail_resets.store(fail, Ordering::SeqCst);
    }

    /// Connections opened so far
    pub fn created(&self) -> u64 {
        self.store.created.load(Ordering::SeqCst)
    }

    /// Connections closed so far
    pub fn closed(&self) -> u64 {
        self.store.closed.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn live(&self) -> u64 {
        self.created().saturating_sub(self.closed())
    }

    /// Statements executed across all connections, probes included
    pub fn statements(&self) -> u64 {
        self.store.statements.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let latency = *self.store.connect_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let should_fail = self
            .store
            .fail_next_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(if self.store.fail_with_timeout.load(Ordering::SeqCst) {
                ReliefError::connect_timeout("memory backend: connect timed out")
            } else {
                ReliefError::connect("memory backend: connection refused")
            });
        }

        let id = self.store.next_id.fetch_add(1, Ordering::SeqCst);
        self.store.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            id,
            generation: self.store.generation.load(Ordering::SeqCst),
            store: Arc::clone(&self.store),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A connection to the in-process backend
pub struct MemoryConnection {
    id: u64,
    generation: u64,
    store: Arc<MemoryStore>,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn is_severed(&self) -> bool {
        self.generation < self.store.generation.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn driver_name(&self) -> &str {
        "memory"
    }

    async fn execute(&self, _sql: &str) -> Result<u64> {
        let latency = *self.store.statement_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.is_closed() {
            return Err(ReliefError::Query("connection is closed".into()));
        }
        if self.is_severed() {
            return Err(ReliefError::Query("connection reset by peer".into()));
        }
        self.store.statements.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn reset(&self) -> Result<()> {
        if self.store.fail_resets.load(Ordering::SeqCst) {
            return Err(ReliefError::Query("memory backend: rollback failed".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.store.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
