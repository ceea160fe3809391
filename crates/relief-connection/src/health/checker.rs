//! Health checker used by the pool on acquire and release

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use relief_core::Connection;

use super::ping::ping_connection;

/// Configuration for health checking
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Statement executed as the probe
    pub probe: String,
    /// Timeout for each probe
    pub timeout: Duration,
}

impl HealthCheckConfig {
    /// Create a new health check configuration.
    pub fn new(probe: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe: probe.into(),
            timeout,
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self::new("SELECT 1", Duration::from_secs(2))
    }
}

/// Result of a single health check
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Whether the probe succeeded
    pub healthy: bool,
    /// Latency of the probe, if successful
    pub latency: Option<Duration>,
    /// Error message if the check failed
    pub error: Option<String>,
    /// Timestamp of when the check was performed
    pub checked_at: Instant,
}

impl HealthCheckResult {
    /// Create a successful health check result.
    pub fn success(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency: Some(latency),
            error: None,
            checked_at: Instant::now(),
        }
    }

    /// Create a failed health check result.
    pub fn failure(error: String) -> Self {
        Self {
            healthy: false,
            latency: None,
            error: Some(error),
            checked_at: Instant::now(),
        }
    }
}

/// Cheap, bounded-time liveness probe for pooled connections.
///
/// Checking never fails: a broken connection is reported as unhealthy.
pub struct HealthChecker {
    config: HealthCheckConfig,
    total_checks: AtomicU64,
    failed_checks: AtomicU64,
}

impl HealthChecker {
    /// Create a new health checker with the given configuration.
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            total_checks: AtomicU64::new(0),
            failed_checks: AtomicU64::new(0),
        }
    }

    /// Create a health checker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(HealthCheckConfig::default())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Number of probes run so far.
    pub fn total_checks(&self) -> u64 {
        self.total_checks.load(Ordering::SeqCst)
    }

    /// Number of probes that reported the connection dead.
    pub fn failed_checks(&self) -> u64 {
        self.failed_checks.load(Ordering::SeqCst)
    }

    /// Probe a connection and report the outcome with latency details.
    pub async fn check_connection(&self, conn: &dyn Connection) -> HealthCheckResult {
        self.total_checks.fetch_add(1, Ordering::SeqCst);

        match ping_connection(conn, &self.config.probe, self.config.timeout).await {
            Ok(latency) => HealthCheckResult::success(latency),
            Err(e) => {
                self.failed_checks.fetch_add(1, Ordering::SeqCst);
                HealthCheckResult::failure(e.to_string())
            }
        }
    }

    /// Probe a connection; `false` means it should be destroyed.
    pub async fn check(&self, conn: &dyn Connection) -> bool {
        let result = self.check_connection(conn).await;
        if let Some(error) = &result.error {
            tracing::debug!(driver = conn.driver_name(), %error, "health check failed");
        }
        result.healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::with_defaults()
    }
}
