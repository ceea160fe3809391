//! Pool configuration types

use std::time::Duration;

use relief_core::{ReliefError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls pool sizing, timeouts, and connection lifecycle. Field names
/// serialize in camelCase (`minConnections`, `idleTimeoutSeconds`, ...) to
/// match the service configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Connections opened eagerly when the pool is initialized
    min_connections: usize,
    /// Hard cap on idle + leased connections
    max_connections: usize,
    /// Idle connections unused for longer than this are evicted by the reaper
    idle_timeout_seconds: u64,
    /// Default time an `acquire()` waits before reporting exhaustion
    acquire_timeout_seconds: u64,
    /// Statement used as the liveness probe
    health_check_probe: String,
    /// Upper bound on a single factory `create()` call
    connect_timeout_ms: u64,
    /// Upper bound on a single liveness probe
    health_check_timeout_ms: u64,
    /// How often the idle reaper sweeps
    reaper_interval_ms: u64,
}

impl PoolConfig {
    /// Create a new pool configuration with the given min and max sizes
    ///
    /// # Panics
    ///
    /// Panics if `min_connections > max_connections` or if `max_connections` is 0.
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        assert!(
            max_connections > 0,
            "max_connections must be greater than 0, got {}",
            max_connections
        );
        assert!(
            min_connections <= max_connections,
            "min_connections ({}) cannot exceed max_connections ({})",
            min_connections,
            max_connections
        );

        Self {
            min_connections,
            max_connections,
            idle_timeout_seconds: 300,
            acquire_timeout_seconds: 10,
            health_check_probe: "SELECT 1".to_string(),
            connect_timeout_ms: 5_000,
            health_check_timeout_ms: 2_000,
            reaper_interval_ms: 30_000,
        }
    }

    /// Set the idle timeout in seconds
    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_seconds = secs;
        self
    }

    /// Set the default acquire timeout in seconds
    pub fn with_acquire_timeout_secs(mut self, secs: u64) -> Self {
        self.acquire_timeout_seconds = secs;
        self
    }

    /// Set the statement used to probe connection liveness
    pub fn with_health_check_probe(mut self, probe: impl Into<String>) -> Self {
        self.health_check_probe = probe.into();
        self
    }

    /// Set the connect timeout in milliseconds
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Set the health check timeout in milliseconds
    pub fn with_health_check_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.health_check_timeout_ms = timeout_ms;
        self
    }

    /// Set the reaper sweep interval in milliseconds
    pub fn with_reaper_interval_ms(mut self, interval_ms: u64) -> Self {
        self.reaper_interval_ms = interval_ms;
        self
    }

    /// Check a configuration that did not go through [`PoolConfig::new`],
    /// e.g. one read from a file.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ReliefError::Configuration(
                "maxConnections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ReliefError::Configuration(format!(
                "minConnections ({}) cannot exceed maxConnections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.health_check_probe.trim().is_empty() {
            return Err(ReliefError::Configuration(
                "healthCheckProbe cannot be empty".into(),
            ));
        }
        if self.reaper_interval_ms == 0 {
            return Err(ReliefError::Configuration(
                "reaperIntervalMs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn min_connections(&self) -> usize {
        self.min_connections
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    pub fn health_check_probe(&self) -> &str {
        &self.health_check_probe
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - min_connections: 5
    /// - max_connections: 50
    /// - idle_timeout: 300 seconds
    /// - acquire_timeout: 10 seconds
    /// - health_check_probe: `SELECT 1`
    fn default() -> Self {
        Self::new(5, 50)
    }
}
