//! `relief-pool` - inspect pool configuration and exercise the pool under load

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relief_connection::memory::MemoryConnectionFactory;
use relief_connection::{ConnectionPool, RetryCoordinator, ServiceConfig};
use relief_core::Connection;

mod logging;

use logging::{LoggingConfig, TimingGuard};

#[derive(Parser, Debug)]
#[command(name = "relief-pool")]
#[command(version, about = "Bounded connection pool toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Service config file (TOML with [pool] and [retry] tables)
    #[arg(long, global = true, env = "RELIEF_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (error, warn, info, debug, trace or a directive list)
    #[arg(long, global = true, env = "RELIEF_LOG_LEVEL")]
    log_level: Option<String>,

    /// Also write JSON logs, to DIR or the default log directory
    #[arg(long, global = true, value_name = "DIR", num_args = 0..=1)]
    json_logs: Option<Option<PathBuf>>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration as JSON
    Config,

    /// Drive a pool over the in-memory backend and report its statistics
    Simulate {
        /// Concurrent worker tasks
        #[arg(long, default_value = "8")]
        workers: usize,

        /// Acquire/release cycles per worker
        #[arg(long, default_value = "1000")]
        cycles: usize,

        /// How long each worker holds a connection, in milliseconds
        #[arg(long, default_value = "0")]
        hold_ms: u64,

        /// Simulated connect latency, in milliseconds
        #[arg(long, default_value = "0")]
        connect_latency_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LoggingConfig::development();
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_filter(level.clone());
    }
    if let Some(dir) = cli.json_logs.clone() {
        log_config = log_config.with_json_logs(dir.unwrap_or_else(logging::log_directory));
    }
    let _log_guard = logging::init(log_config)?;

    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            workers,
            cycles,
            hold_ms,
            connect_latency_ms,
        } => {
            let report = simulate(
                config,
                workers,
                cycles,
                Duration::from_millis(hold_ms),
                Duration::from_millis(connect_latency_ms),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Run `workers` tasks that each perform `cycles` retried `with_connection`
/// calls, then shut the pool down and return the final statistics.
async fn simulate(
    config: ServiceConfig,
    workers: usize,
    cycles: usize,
    hold: Duration,
    connect_latency: Duration,
) -> Result<serde_json::Value> {
    let _timer = TimingGuard::new("simulate");

    let factory = MemoryConnectionFactory::new().with_connect_latency(connect_latency);
    let pool = ConnectionPool::initialize(config.pool, factory.clone())
        .await
        .context("failed to initialize pool")?;
    let coordinator = RetryCoordinator::shared(pool.clone(), config.retry);

    tracing::info!(workers, cycles, hold_ms = hold.as_millis() as u64, "starting simulation");

    let tasks: Vec<_> = (0..workers)
        .map(|worker| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let mut failures = 0usize;
                for _ in 0..cycles {
                    let result = coordinator
                        .with_connection(|conn: Arc<dyn Connection>| async move {
                            let rows = conn.execute("UPDATE faq SET views = views + 1").await?;
                            if !hold.is_zero() {
                                tokio::time::sleep(hold).await;
                            }
                            Ok(rows)
                        })
                        .await;
                    if let Err(e) = result {
                        failures += 1;
                        tracing::warn!(worker, error = %e, "simulated request failed");
                    }
                }
                failures
            })
        })
        .collect();

    let mut failures = 0;
    for result in futures::future::join_all(tasks).await {
        failures += result.context("worker task panicked")?;
    }

    let pool_stats = pool.stats();
    let retry_stats = coordinator.stats();
    pool.shutdown().await;

    Ok(serde_json::json!({
        "pool": pool_stats,
        "retry": retry_stats,
        "failures": failures,
        "connectionsOpened": factory.created(),
    }))
}
