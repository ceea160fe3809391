//! Relief Core - Core abstractions shared by the connection pool
//!
//! This crate provides the fundamental traits and types that the pool and
//! its consumers depend on:
//!
//! - `Connection` - Trait for a live handle to the backing store
//! - `ReliefError` - Error taxonomy surfaced by the pool and retry layer

mod connection;
mod error;

pub use connection::*;
pub use error::*;
