//! Tests for connection pool functionality

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use relief_core::{Connection, ReliefError, Result};
use rstest::rstest;

use super::config::PoolConfig;
use super::pool::{ConnectionFactory, ConnectionPool};
use super::reaper::ReapReport;
use super::stats::{PoolStats, PoolStatus};
use crate::memory::MemoryConnectionFactory;

/// Connection that panics when closed
struct PanicOnClose;

#[async_trait]
impl Connection for PanicOnClose {
    fn driver_name(&self) -> &str {
        "panic-on-close"
    }

    async fn execute(&self, _sql: &str) -> Result<u64> {
        Ok(0)
    }

    async fn close(&self) -> Result<()> {
        panic!("close exploded");
    }

    fn is_closed(&self) -> bool {
        false
    }
}

struct PanicOnCloseFactory;

#[async_trait]
impl ConnectionFactory for PanicOnCloseFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(PanicOnClose))
    }
}

/// Pool config whose background reaper never fires during a test
fn test_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig::new(min, max).with_reaper_interval_ms(60_000)
}

async fn test_pool(min: usize, max: usize) -> (ConnectionPool, MemoryConnectionFactory) {
    let factory = MemoryConnectionFactory::new();
    let pool = ConnectionPool::initialize(test_config(min, max), factory.clone())
        .await
        .unwrap();
    (pool, factory)
}

#[test]
fn test_pool_config_creation() {
    let config = PoolConfig::new(2, 10);
    assert_eq!(config.min_connections(), 2);
    assert_eq!(config.max_connections(), 10);
    assert_eq!(config.idle_timeout(), Duration::from_secs(300));
    assert_eq!(config.acquire_timeout(), Duration::from_secs(10));
    assert_eq!(config.health_check_probe(), "SELECT 1");
}

#[test]
fn test_pool_config_with_timeouts() {
    let config = PoolConfig::new(1, 5)
        .with_idle_timeout_secs(60)
        .with_acquire_timeout_secs(3)
        .with_connect_timeout_ms(750)
        .with_health_check_timeout_ms(250)
        .with_reaper_interval_ms(1_000)
        .with_health_check_probe("SELECT 42");

    assert_eq!(config.idle_timeout(), Duration::from_secs(60));
    assert_eq!(config.acquire_timeout(), Duration::from_secs(3));
    assert_eq!(config.connect_timeout(), Duration::from_millis(750));
    assert_eq!(config.health_check_timeout(), Duration::from_millis(250));
    assert_eq!(config.reaper_interval(), Duration::from_secs(1));
    assert_eq!(config.health_check_probe(), "SELECT 42");
}

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();
    assert_eq!(config.min_connections(), 5);
    assert_eq!(config.max_connections(), 50);
    assert_eq!(config.reaper_interval(), Duration::from_secs(30));
}

#[test]
#[should_panic(expected = "max_connections must be greater than 0")]
fn test_pool_config_invalid_max() {
    PoolConfig::new(0, 0);
}

#[test]
#[should_panic(expected = "min_connections (10) cannot exceed max_connections (5)")]
fn test_pool_config_min_exceeds_max() {
    PoolConfig::new(10, 5);
}

#[test]
fn test_pool_config_serialization() {
    let config = PoolConfig::new(2, 8).with_idle_timeout_secs(120);
    let json = serde_json::to_value(&config).unwrap();

    assert_eq!(json["minConnections"], 2);
    assert_eq!(json["maxConnections"], 8);
    assert_eq!(json["idleTimeoutSeconds"], 120);
    assert_eq!(json["healthCheckProbe"], "SELECT 1");

    let parsed: PoolConfig = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_pool_config_validate_rejects_deserialized_nonsense() {
    let config: PoolConfig =
        serde_json::from_str(r#"{"minConnections": 10, "maxConnections": 5}"#).unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ReliefError::Configuration(_)));
    assert!(err.to_string().contains("cannot exceed maxConnections"));

    let config: PoolConfig = serde_json::from_str(r#"{"healthCheckProbe": ""}"#).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_pool_stats_creation() {
    let stats = PoolStats::new(3, 2, 10, 0, 5, 0);
    assert_eq!(stats.active(), 3);
    assert_eq!(stats.idle_queued(), 2);
    assert_eq!(stats.total(), 5);
    assert_eq!(stats.utilization_pct(), 30.0);
    assert_eq!(stats.status(), PoolStatus::Healthy);
    assert!(!stats.is_exhausted());
}

#[rstest]
#[case(0, 10, PoolStatus::Healthy)]
#[case(7, 10, PoolStatus::Healthy)]
#[case(8, 10, PoolStatus::Warning)]
#[case(19, 20, PoolStatus::Critical)]
#[case(5, 5, PoolStatus::Critical)]
fn test_pool_stats_status(#[case] active: usize, #[case] max: usize, #[case] expected: PoolStatus) {
    assert_eq!(PoolStats::new(active, 0, max, 0, 0, 0).status(), expected);
}

#[test]
fn test_pool_stats_is_exhausted() {
    assert!(PoolStats::new(5, 0, 5, 2, 5, 0).is_exhausted());
    assert!(!PoolStats::new(4, 1, 5, 0, 5, 0).is_exhausted());
}

#[test]
fn test_pool_stats_serialization() {
    let stats = PoolStats::new(4, 1, 5, 0, 6, 1);
    let json = serde_json::to_value(stats).unwrap();

    assert_eq!(json["active"], 4);
    assert_eq!(json["idleQueued"], 1);
    assert_eq!(json["max"], 5);
    assert_eq!(json["utilizationPct"], 80.0);
    assert_eq!(json["status"], "warning");
    assert_eq!(json["totalCreated"], 6);
    assert_eq!(json["totalDestroyed"], 1);
}

#[tokio::test]
async fn test_initialize_prewarms_min_connections() {
    let (pool, factory) = test_pool(3, 5).await;

    let stats = pool.stats();
    assert_eq!(stats.idle_queued(), 3);
    assert_eq!(stats.active(), 0);
    assert_eq!(factory.created(), 3);
    assert!(pool.is_reaper_running());
}

#[tokio::test]
async fn test_initialize_tolerates_prewarm_failures() {
    let factory = MemoryConnectionFactory::new();
    factory.fail_next_creates(2);

    let pool = ConnectionPool::initialize(test_config(3, 5), factory.clone())
        .await
        .unwrap();

    assert_eq!(pool.stats().idle_queued(), 1);
    assert_eq!(pool.stats().active(), 0);
}

#[tokio::test]
async fn test_initialize_rejects_invalid_config() {
    let config: PoolConfig =
        serde_json::from_str(r#"{"minConnections": 3, "maxConnections": 0}"#).unwrap();
    let result = ConnectionPool::initialize(config, MemoryConnectionFactory::new()).await;
    assert!(matches!(result, Err(ReliefError::Configuration(_))));
}

#[tokio::test]
async fn test_acquire_and_release_restores_idle_count() {
    let (pool, _factory) = test_pool(2, 5).await;
    let before = pool.stats().idle_queued();

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(pool.stats().active(), 1);
    assert_eq!(pool.stats().idle_queued(), before - 1);

    conn.execute("UPDATE faq SET views = views + 1").await.unwrap();
    conn.release().await;

    assert_eq!(pool.stats().idle_queued(), before);
    assert_eq!(pool.stats().active(), 0);
}

#[tokio::test]
async fn test_connections_are_probed_before_handout() {
    let (pool, factory) = test_pool(0, 2).await;

    // Fresh connection: one probe on the way out
    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(factory.statements(), 1);

    // One probe on the way back in
    conn.release().await;
    assert_eq!(factory.statements(), 2);

    // Reused connection: probed again before handout
    let _conn = pool.acquire().await.unwrap();
    assert_eq!(factory.statements(), 3);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (pool, _factory) = test_pool(0, 2).await;

    let mut conn = pool.acquire().await.unwrap();
    let id = conn.id();
    assert!(id.is_some());

    conn.release().await;
    conn.release().await;
    conn.release().await;

    assert!(conn.is_released());
    assert_eq!(conn.id(), None);
    let stats = pool.stats();
    assert_eq!(stats.idle_queued(), 1);
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.total_destroyed(), 0);
}

#[tokio::test]
async fn test_dropped_lease_returns_to_pool() {
    let (pool, _factory) = test_pool(0, 2).await;

    {
        let _conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().active(), 1);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = pool.stats();
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.idle_queued(), 1);
}

#[test]
fn test_lease_dropped_outside_runtime_is_discarded() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (pool, factory, lease) = rt.block_on(async {
        let (pool, factory) = test_pool(0, 2).await;
        let lease = pool.acquire().await.unwrap();
        (pool, factory, lease)
    });

    drop(lease);

    let stats = pool.stats();
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.idle_queued(), 0);
    assert_eq!(stats.total_destroyed(), 1);
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_exhausted_pool_times_out() {
    let (pool, _factory) = test_pool(0, 2).await;

    let _first = pool.acquire().await.unwrap();
    let _second = pool.acquire().await.unwrap();

    let start = Instant::now();
    let result = pool.acquire_with_timeout(Duration::from_millis(200)).await;
    let elapsed = start.elapsed();

    match result {
        Err(ReliefError::PoolExhausted { active, max, .. }) => {
            assert_eq!(active, 2);
            assert_eq!(max, 2);
        }
        other => panic!("expected PoolExhausted, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(200), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(700), "returned after {:?}", elapsed);
    assert_eq!(pool.stats().waiting(), 0);
}

#[tokio::test]
async fn test_waiter_receives_released_connection() {
    let (pool, _factory) = test_pool(0, 1).await;
    let mut held = pool.acquire().await.unwrap();
    let held_id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_with_timeout(Duration::from_secs(5)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.stats().waiting(), 1);

    held.release().await;
    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.id(), held_id);
    assert_eq!(pool.stats().waiting(), 0);
}

#[rstest]
#[case(5)]
#[case(20)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cycles_respect_max(#[case] workers: usize) {
    const MAX: usize = 5;
    const CYCLES: usize = 1000;

    let factory = MemoryConnectionFactory::new();
    let pool = ConnectionPool::initialize(
        test_config(0, MAX).with_acquire_timeout_secs(30),
        factory.clone(),
    )
    .await
    .unwrap();
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::with_capacity(workers);
    for _ in 0..workers {
        let pool = pool.clone();
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            for _ in 0..CYCLES {
                let mut conn = pool.acquire().await.unwrap();
                let stats = pool.stats();
                assert!(stats.total() <= MAX, "pool grew to {}", stats.total());
                peak.fetch_max(stats.active(), Ordering::SeqCst);
                conn.execute("SELECT 1").await.unwrap();
                conn.release().await;
            }
        }));
    }

    let all = futures::future::join_all(tasks);
    let results = tokio::time::timeout(Duration::from_secs(60), all)
        .await
        .expect("workers deadlocked");
    for result in results {
        result.unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.active(), 0);
    assert!(stats.idle_queued() <= MAX);
    assert!(peak.load(Ordering::SeqCst) <= MAX);
    assert!(factory.created() <= MAX as u64);
}

#[tokio::test]
async fn test_dead_idle_connection_is_replaced() {
    let (pool, factory) = test_pool(1, 1).await;
    factory.kill_all();

    let mut conn = pool.acquire().await.unwrap();
    conn.execute("SELECT 1").await.unwrap();

    assert_eq!(factory.created(), 2);
    assert_eq!(factory.closed(), 1);
    assert_eq!(pool.stats().total_destroyed(), 1);
    conn.release().await;
}

#[tokio::test]
async fn test_connection_dead_on_release_is_destroyed() {
    let (pool, factory) = test_pool(0, 2).await;

    let mut conn = pool.acquire().await.unwrap();
    factory.kill_all();
    conn.release().await;

    let stats = pool.stats();
    assert_eq!(stats.idle_queued(), 0);
    assert_eq!(stats.active(), 0);
    assert_eq!(factory.closed(), 1);
}

#[tokio::test]
async fn test_failed_reset_destroys_connection() {
    let (pool, factory) = test_pool(0, 2).await;
    factory.set_fail_resets(true);

    let mut conn = pool.acquire().await.unwrap();
    conn.release().await;

    assert_eq!(pool.stats().idle_queued(), 0);
    assert_eq!(pool.stats().active(), 0);
    assert_eq!(factory.live(), 0);
}

#[tokio::test]
async fn test_connect_failure_frees_reservation() {
    let (pool, factory) = test_pool(0, 1).await;
    factory.fail_next_creates(1);

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, ReliefError::ConnectFailure { timed_out: false, .. }));
    assert!(!err.is_transient());
    assert_eq!(pool.stats().active(), 0);

    // Capacity is available again
    let _conn = pool.acquire().await.unwrap();
}

#[tokio::test]
async fn test_slow_connect_times_out_as_transient() {
    let factory = MemoryConnectionFactory::new().with_connect_latency(Duration::from_millis(300));
    let pool = ConnectionPool::initialize(
        test_config(0, 1).with_connect_timeout_ms(50),
        factory.clone(),
    )
    .await
    .unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, ReliefError::ConnectFailure { timed_out: true, .. }));
    assert!(err.is_transient());
    assert_eq!(pool.stats().active(), 0);
}

#[tokio::test]
async fn test_idle_connections_evicted_by_reaper() {
    let factory = MemoryConnectionFactory::new();
    let config = PoolConfig::new(2, 2)
        .with_idle_timeout_secs(1)
        .with_reaper_interval_ms(100);
    let pool = ConnectionPool::initialize(config, factory.clone())
        .await
        .unwrap();

    let mut a = pool.acquire().await.unwrap();
    let mut b = pool.acquire().await.unwrap();
    a.release().await;
    b.release().await;
    assert_eq!(pool.stats().idle_queued(), 2);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stats = pool.stats();
    assert_eq!(stats.idle_queued(), 0);
    assert_eq!(stats.total_destroyed(), 2);
    assert_eq!(factory.closed(), 2);

    // Lazily re-created on demand
    let _conn = pool.acquire().await.unwrap();
    assert_eq!(factory.created(), 3);
}

#[tokio::test]
async fn test_manual_reap_reports_sweep() {
    let pool = ConnectionPool::initialize(
        test_config(3, 4).with_idle_timeout_secs(0),
        MemoryConnectionFactory::new(),
    )
    .await
    .unwrap();
    let _held = pool.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = pool.reap_idle().await;
    assert_eq!(report.evicted, 2);
    assert_eq!(report.remaining_idle, 0);
    assert_eq!(report.active, 1);
    assert_eq!(report.utilization_pct, 25.0);
}

#[tokio::test]
async fn test_with_connection_releases_on_error() {
    let (pool, _factory) = test_pool(0, 1).await;

    let rows = pool
        .with_connection(|conn| async move { conn.execute("DELETE FROM reports").await })
        .await
        .unwrap();
    assert_eq!(rows, 0);

    let result: relief_core::Result<()> = pool
        .with_connection(|_conn| async { Err(ReliefError::Query("constraint violated".into())) })
        .await;
    assert!(matches!(result, Err(ReliefError::Query(_))));

    assert_eq!(pool.stats().active(), 0);
    assert_eq!(pool.stats().idle_queued(), 1);
}

#[tokio::test]
async fn test_force_cleanup_rebuilds_idle_set() {
    let (pool, factory) = test_pool(2, 4).await;
    let held = pool.acquire().await.unwrap();

    let reopened = pool.force_cleanup().await.unwrap();

    // One idle closed; min is satisfied by the lease plus one fresh connection
    assert_eq!(reopened, 1);
    assert_eq!(factory.closed(), 1);
    assert_eq!(factory.created(), 3);
    assert_eq!(pool.stats().active(), 1);
    assert_eq!(pool.stats().idle_queued(), 1);
    assert!(!held.is_closed());
}

#[tokio::test]
async fn test_shutdown_with_outstanding_lease() {
    let (pool, factory) = test_pool(1, 2).await;
    let mut conn = pool.acquire().await.unwrap();

    pool.shutdown().await;
    assert!(pool.is_shutdown());
    assert!(!pool.is_reaper_running());

    // The lease stays usable until released
    conn.execute("SELECT 1").await.unwrap();
    conn.release().await;

    let stats = pool.stats();
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.idle_queued(), 0);
    assert_eq!(factory.live(), 0);

    assert!(matches!(pool.acquire().await, Err(ReliefError::Shutdown)));
    assert!(matches!(pool.force_cleanup().await, Err(ReliefError::Shutdown)));

    // Second shutdown is a no-op
    pool.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_wakes_waiters() {
    let (pool, _factory) = test_pool(0, 1).await;
    let _held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_with_timeout(Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    pool.shutdown().await;
    let result = waiter.await.unwrap();

    assert!(matches!(result, Err(ReliefError::Shutdown)));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_reaper_runs_until_shutdown() {
    let (pool, _factory) = test_pool(0, 1).await;
    let probe = pool.clone();
    assert!(probe.is_reaper_running());
    drop(pool);

    // Another handle is still alive
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(probe.is_reaper_running());

    probe.shutdown().await;
    assert!(!probe.is_reaper_running());
}

#[tokio::test]
async fn test_unrepresentable_acquire_timeout_waits_without_overflow() {
    let config: PoolConfig = serde_json::from_str(
        r#"{"minConnections": 0, "maxConnections": 1, "acquireTimeoutSeconds": 18446744073709551615}"#,
    )
    .unwrap();
    assert!(config.validate().is_ok());
    let pool = ConnectionPool::initialize(config, MemoryConnectionFactory::new())
        .await
        .unwrap();

    let mut held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.stats().waiting(), 1);

    held.release().await;
    let conn = waiter.await.unwrap().unwrap();
    assert!(!conn.is_released());
}

#[tokio::test]
async fn test_hung_health_check_respects_acquire_deadline() {
    let (pool, factory) = test_pool(1, 1).await;
    factory.set_statement_latency(Duration::from_secs(1));

    let start = Instant::now();
    let result = pool.acquire_with_timeout(Duration::from_millis(150)).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(ReliefError::PoolExhausted { .. })));
    assert!(elapsed < Duration::from_millis(600), "returned after {:?}", elapsed);

    // The connection whose probe was abandoned is not pooled again
    let stats = pool.stats();
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.idle_queued(), 0);
    assert_eq!(stats.total_destroyed(), 1);

    factory.set_statement_latency(Duration::ZERO);
    let _conn = pool.acquire().await.unwrap();
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_reaper_survives_panicking_sweep() {
    let config = PoolConfig::new(2, 2)
        .with_idle_timeout_secs(0)
        .with_reaper_interval_ms(50);
    let pool = ConnectionPool::initialize(config, PanicOnCloseFactory)
        .await
        .unwrap();
    assert_eq!(pool.stats().idle_queued(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = pool.stats();
    assert_eq!(stats.idle_queued(), 0);
    assert_eq!(stats.total_destroyed(), 2);
    assert!(pool.is_reaper_running());

    // Sweeps keep running after the panic
    let _conn = pool.acquire().await.unwrap();
    assert!(pool.is_reaper_running());
}

#[rstest]
#[case(3, 5, PoolStatus::Healthy)]
#[case(4, 5, PoolStatus::Warning)]
#[case(5, 5, PoolStatus::Critical)]
#[tokio::test]
async fn test_reap_report_flags_high_utilization(
    #[case] leased: usize,
    #[case] max: usize,
    #[case] expected: PoolStatus,
) {
    let (pool, _factory) = test_pool(0, max).await;
    let mut leases = Vec::with_capacity(leased);
    for _ in 0..leased {
        leases.push(pool.acquire().await.unwrap());
    }

    let report = pool.reap_idle().await;

    assert_eq!(report.active, leased);
    assert_eq!(report.utilization_pct, leased as f64 / max as f64 * 100.0);
    assert_eq!(report.status(), expected);
    assert_eq!(report.status().is_healthy(), expected == PoolStatus::Healthy);
}

#[test]
fn test_empty_reap_report_is_healthy() {
    let report = ReapReport::default();
    assert_eq!(report.status(), PoolStatus::Healthy);
    assert!(report.status().is_healthy());
}
