//! Connection trait for the backing store

use crate::Result;
use async_trait::async_trait;

/// A live connection to the backing store
///
/// Implementations are opaque to the pool: it only needs to run a probe
/// statement, reset session state between leases, and close the handle.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "postgresql", "memory")
    fn driver_name(&self) -> &str;

    /// Execute a statement and return the number of rows affected
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Discard any session state (open transactions, temp settings) so the
    /// connection can be handed to the next caller.
    ///
    /// Drivers without session state can rely on the default no-op.
    async fn reset(&self) -> Result<()> {
        tracing::trace!(driver = self.driver_name(), "reset is a no-op for this driver");
        Ok(())
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}
