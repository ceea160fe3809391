//! Relief Connection - Bounded connection pooling
//!
//! This crate multiplexes many concurrent request handlers over a small set
//! of backing-store connections: health-checked acquisition, idle eviction,
//! acquire timeouts, graceful shutdown and retry of transient exhaustion.

mod config;
pub mod health;
pub mod memory;
pub mod pool;
pub mod retry;

pub use config::ServiceConfig;
pub use health::{HealthCheckConfig, HealthCheckResult, HealthChecker, PingError, PingResult, ping_connection};
pub use pool::{
    ConnectionFactory, ConnectionPool, IdleReaper, PoolConfig, PoolStats, PoolStatus,
    PooledConnection, ReapReport,
};
pub use retry::{BackoffStrategy, RetryConfig, RetryCoordinator, RetryStats};
