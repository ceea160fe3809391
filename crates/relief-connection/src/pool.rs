//! Connection pooling for the backing store
//!
//! This module provides a bounded pool with health-checked acquisition,
//! idle eviction, acquire timeouts and graceful shutdown.
//!
//! # Example
//!
//! ```ignore
//! use relief_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(5, 50)
//!     .with_acquire_timeout_secs(10)
//!     .with_idle_timeout_secs(300);
//!
//! let pool = ConnectionPool::initialize(config, connection_factory).await?;
//! let mut conn = pool.acquire().await?;
//! conn.execute("UPDATE reports SET status = 'closed' WHERE id = 7").await?;
//! conn.release().await;
//! ```

mod config;
mod lease;
#[allow(clippy::module_inception)]
mod pool;
mod reaper;
mod stats;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use lease::PooledConnection;
pub use pool::{ConnectionFactory, ConnectionPool};
pub use reaper::{IdleReaper, ReapReport};
pub use stats::{CRITICAL_UTILIZATION_PCT, PoolStats, PoolStatus, WARNING_UTILIZATION_PCT};
