//! Connection liveness probe
//!
//! Runs the configured probe statement with a deadline and measures the
//! round-trip time.

use std::time::{Duration, Instant};

use relief_core::Connection;
use thiserror::Error;

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Why a connection failed its liveness probe.
///
/// This is the pool's internal health-check failure: it is logged and the
/// connection is destroyed, but it never reaches a pool caller.
#[derive(Debug, Clone, Error)]
pub enum PingError {
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("Ping probe failed: {0}")]
    ProbeFailed(String),
    #[error("Ping timed out after {0:?}")]
    Timeout(Duration),
}

/// Ping a connection to check if it's alive.
///
/// Executes `probe` (typically `SELECT 1`) and returns the round-trip time.
/// The probe is abandoned after `timeout`, so a hung connection cannot stall
/// the caller.
///
/// ```ignore
/// use relief_connection::health::ping_connection;
///
/// let latency = ping_connection(&*conn, "SELECT 1", Duration::from_secs(2)).await?;
/// println!("Store latency: {:?}", latency);
/// ```
pub async fn ping_connection(conn: &dyn Connection, probe: &str, timeout: Duration) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();

    match tokio::time::timeout(timeout, conn.execute(probe)).await {
        Ok(Ok(_)) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(PingError::ProbeFailed(e.to_string())),
        Err(_) => Err(PingError::Timeout(timeout)),
    }
}
