//! Service-level configuration file

use std::path::Path;

use relief_core::{ReliefError, Result};
use serde::{Deserialize, Serialize};

use crate::pool::PoolConfig;
use crate::retry::RetryConfig;

/// Pool and retry settings as read from a TOML file
///
/// ```toml
/// [pool]
/// minConnections = 5
/// maxConnections = 50
/// idleTimeoutSeconds = 300
/// acquireTimeoutSeconds = 10
/// healthCheckProbe = "SELECT 1"
///
/// [retry]
/// maxRetries = 3
/// baseDelayMs = 500
/// ```
///
/// Missing tables or keys fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub pool: PoolConfig,
    pub retry: RetryConfig,
}

impl ServiceConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ServiceConfig =
            toml::from_str(source).map_err(|e| ReliefError::Configuration(e.to_string()))?;
        config.pool.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded service configuration");
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReliefError::Configuration(e.to_string()))
    }
}
