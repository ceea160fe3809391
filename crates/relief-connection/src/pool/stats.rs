//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Utilization (percent of `max`) at which the pool is reported as `warning`
pub const WARNING_UTILIZATION_PCT: f64 = 80.0;
/// Utilization (percent of `max`) at which the pool is reported as `critical`
pub const CRITICAL_UTILIZATION_PCT: f64 = 95.0;

/// Coarse pool health derived from utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Below 80% of capacity in use
    Healthy,
    /// Between 80% and 95% of capacity in use
    Warning,
    /// 95% of capacity or more in use
    Critical,
}

impl PoolStatus {
    /// Classify a utilization percentage (0.0 to 100.0).
    ///
    /// ```
    /// use relief_connection::pool::PoolStatus;
    ///
    /// assert_eq!(PoolStatus::from_utilization(50.0), PoolStatus::Healthy);
    /// assert_eq!(PoolStatus::from_utilization(80.0), PoolStatus::Warning);
    /// assert_eq!(PoolStatus::from_utilization(95.0), PoolStatus::Critical);
    /// ```
    pub fn from_utilization(utilization_pct: f64) -> Self {
        if utilization_pct >= CRITICAL_UTILIZATION_PCT {
            PoolStatus::Critical
        } else if utilization_pct >= WARNING_UTILIZATION_PCT {
            PoolStatus::Warning
        } else {
            PoolStatus::Healthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, PoolStatus::Healthy)
    }
}

impl Default for PoolStatus {
    fn default() -> Self {
        PoolStatus::Healthy
    }
}

/// Read-only snapshot of a pool's counters
///
/// Serializes to the JSON shape served on the observability endpoint:
/// `{"active", "idleQueued", "max", "utilizationPct", "status", ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Connections currently leased (including ones being opened)
    active: usize,
    /// Connections sitting in the idle set
    idle_queued: usize,
    /// Configured capacity
    max: usize,
    /// `active / max` as a percentage
    utilization_pct: f64,
    status: PoolStatus,
    /// Callers currently blocked in `acquire()`
    waiting: usize,
    /// Connections opened over the pool's lifetime
    total_created: u64,
    /// Connections closed over the pool's lifetime
    total_destroyed: u64,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(
        active: usize,
        idle_queued: usize,
        max: usize,
        waiting: usize,
        total_created: u64,
        total_destroyed: u64,
    ) -> Self {
        let utilization_pct = utilization_pct(active, max);
        Self {
            active,
            idle_queued,
            max,
            utilization_pct,
            status: PoolStatus::from_utilization(utilization_pct),
            waiting,
            total_created,
            total_destroyed,
        }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn idle_queued(&self) -> usize {
        self.idle_queued
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Total live connections (idle + leased)
    pub fn total(&self) -> usize {
        self.active + self.idle_queued
    }

    pub fn utilization_pct(&self) -> f64 {
        self.utilization_pct
    }

    pub fn status(&self) -> PoolStatus {
        self.status
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn total_created(&self) -> u64 {
        self.total_created
    }

    pub fn total_destroyed(&self) -> u64 {
        self.total_destroyed
    }

    /// Check if the pool is at capacity with nothing idle
    pub fn is_exhausted(&self) -> bool {
        self.idle_queued == 0 && self.active >= self.max
    }
}

/// Percentage of `max` currently leased. Returns 0.0 for a zero-sized pool.
pub(super) fn utilization_pct(active: usize, max: usize) -> f64 {
    if max == 0 {
        0.0
    } else {
        active as f64 / max as f64 * 100.0
    }
}
