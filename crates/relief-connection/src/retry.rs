//! Retry with exponential backoff for transient pool errors
//!
//! `RetryCoordinator` wraps operations that acquire from the pool. When one
//! fails because the pool was momentarily exhausted (or a connect timed
//! out) it is retried after a growing delay; anything else fails at once.
//!
//! # Example
//!
//! ```ignore
//! use relief_connection::retry::{RetryConfig, RetryCoordinator};
//!
//! let coordinator = RetryCoordinator::new(pool.clone(), RetryConfig::default());
//!
//! let rows = coordinator
//!     .with_connection(|conn| async move { conn.execute("DELETE FROM faq WHERE id = 3").await })
//!     .await?;
//! println!("{}", serde_json::to_string(&coordinator.stats())?);
//! ```

mod backoff;
mod coordinator;


pub use backoff::BackoffStrategy;
pub use coordinator::{RetryConfig, RetryCoordinator, RetryStats};
