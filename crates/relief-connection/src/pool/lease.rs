//! Lease handle for a connection borrowed from the pool

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use relief_core::Connection;

use super::pool::{PoolInner, PooledSlot};

/// A connection borrowed from the pool
///
/// Derefs to the underlying [`Connection`]. Call [`release`](Self::release)
/// to hand it back; the first call returns the connection to the pool and
/// every later call does nothing. A lease that is dropped without being
/// released is returned on a background task.
pub struct PooledConnection {
    slot: Option<PooledSlot>,
    pool: Arc<PoolInner>,
    acquired_at: Instant,
}

impl PooledConnection {
    pub(super) fn new(slot: PooledSlot, pool: Arc<PoolInner>) -> Self {
        Self {
            slot: Some(slot),
            pool,
            acquired_at: Instant::now(),
        }
    }

    fn slot(&self) -> &PooledSlot {
        self.slot.as_ref().expect("connection already released")
    }

    /// Pool-assigned id of the leased connection, `None` once released
    pub fn id(&self) -> Option<u64> {
        self.slot.as_ref().map(|slot| slot.id)
    }

    /// Whether the connection has already been handed back
    pub fn is_released(&self) -> bool {
        self.slot.is_none()
    }

    /// Get the underlying connection as an Arc
    ///
    /// The clone must not outlive the lease: once released, the connection
    /// may be handed to another caller.
    ///
    /// # Panics
    ///
    /// Panics if the lease has already been released.
    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.slot().connection)
    }

    /// Hand the connection back to the pool.
    ///
    /// The connection is probed and reset first; if either fails, or the
    /// pool has been shut down, it is closed instead of pooled. Idempotent.
    pub async fn release(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::trace!(
                connection_id = slot.id,
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "releasing connection"
            );
            self.pool.return_slot(slot).await;
        }
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.slot().connection.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move {
                    pool.return_slot(slot).await;
                });
            }
            Err(_) => self.pool.discard_detached(slot),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("released", &self.is_released())
            .finish()
    }
}
