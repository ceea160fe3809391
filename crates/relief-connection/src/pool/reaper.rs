//! Background eviction of idle connections

use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::pool::PoolInner;
use super::stats::PoolStatus;

/// Outcome of one reaper sweep
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReapReport {
    /// Connections closed because they sat idle past the idle timeout
    pub evicted: usize,
    /// Idle connections left after the sweep
    pub remaining_idle: usize,
    /// Leased connections at sweep time
    pub active: usize,
    pub utilization_pct: f64,
}

impl ReapReport {
    /// Pool status implied by the utilization at sweep time
    pub fn status(&self) -> PoolStatus {
        PoolStatus::from_utilization(self.utilization_pct)
    }
}

/// Periodic task that evicts connections idle past the pool's idle timeout.
///
/// Evicted connections are closed right away rather than left for the next
/// health check to notice. Eviction ignores `min_connections`; the pool
/// re-opens connections on demand.
///
/// The task holds only a weak reference to the pool. It stops when the pool
/// is shut down or the last handle to it goes away.
pub struct IdleReaper;

impl IdleReaper {
    pub(super) fn spawn(
        pool: Weak<PoolInner>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(inner) = pool.upgrade() else {
                    break;
                };

                // A panicking sweep must not take the reaper down with it.
                match AssertUnwindSafe(inner.reap_idle()).catch_unwind().await {
                    Ok(report) => Self::log_sweep(&report),
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        tracing::error!(error = %message, "idle reaper sweep panicked");
                    }
                }
            }

            tracing::debug!("idle reaper stopped");
        })
    }

    fn log_sweep(report: &ReapReport) {
        if report.evicted > 0 {
            tracing::debug!(
                evicted = report.evicted,
                remaining_idle = report.remaining_idle,
                "evicted idle connections"
            );
        }
        let status = report.status();
        if !status.is_healthy() {
            tracing::warn!(
                active = report.active,
                utilization_pct = report.utilization_pct,
                ?status,
                "connection pool utilization is high"
            );
        }
    }
}
