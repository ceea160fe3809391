//! Error types for Relief

use thiserror::Error;

/// Core error type for pool and connection operations
#[derive(Error, Debug)]
pub enum ReliefError {
    /// The factory could not open a connection
    #[error("Connection failed: {reason}")]
    ConnectFailure {
        reason: String,
        /// Set when the failure was a connect timeout rather than a refusal
        timed_out: bool,
    },

    /// No connection became available within the acquire timeout
    #[error("Pool exhausted: {active}/{max} connections in use, {waiting} waiting")]
    PoolExhausted {
        active: usize,
        max: usize,
        waiting: usize,
    },

    #[error("Connection pool is shut down")]
    Shutdown,

    #[error("Gave up after {attempts} attempts ({active}/{max} connections in use): {source}")]
    RetriesExhausted {
        attempts: u32,
        active: usize,
        max: usize,
        #[source]
        source: Box<ReliefError>,
    },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ReliefError {
    /// Shorthand for a non-timeout connect failure
    pub fn connect(reason: impl Into<String>) -> Self {
        ReliefError::ConnectFailure {
            reason: reason.into(),
            timed_out: false,
        }
    }

    /// Shorthand for a connect failure caused by a timeout
    pub fn connect_timeout(reason: impl Into<String>) -> Self {
        ReliefError::ConnectFailure {
            reason: reason.into(),
            timed_out: true,
        }
    }

    /// Whether the error is expected to clear up on its own.
    ///
    /// Pool exhaustion always is; connect failures only when they timed out.
    pub fn is_transient(&self) -> bool {
        match self {
            ReliefError::PoolExhausted { .. } => true,
            ReliefError::ConnectFailure { timed_out, .. } => *timed_out,
            _ => false,
        }
    }
}

/// Result type alias for Relief operations
pub type Result<T> = std::result::Result<T, ReliefError>;
