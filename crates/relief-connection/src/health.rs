//! Health check functionality for pooled connections
//!
//! The pool probes every connection before handing it out and again when it
//! comes back, destroying anything that fails.
//!
//! # Example
//!
//! ```ignore
//! use relief_connection::health::{HealthCheckConfig, HealthChecker};
//!
//! let checker = HealthChecker::new(HealthCheckConfig::new("SELECT 1", Duration::from_secs(2)));
//! if !checker.check(&*connection).await {
//!     connection.close().await?;
//! }
//! ```

mod checker;
mod ping;


pub use checker::{HealthCheckConfig, HealthCheckResult, HealthChecker};
pub use ping::{PingError, PingResult, ping_connection};
