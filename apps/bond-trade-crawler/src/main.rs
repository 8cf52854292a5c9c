//! Bond Trade Crawler Binary
//!
//! Starts the worker pool and streams decoded trades to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin bond-trade-crawler
//! ```
//!
//! # Environment Variables
//!
//! ## Targets
//! - `CRAWLER_TARGETS`: Comma-separated `ID` or `ID:START:END` entries
//! - `CRAWLER_START_DATE` / `CRAWLER_END_DATE`: Default window (MM/DD/YYYY)
//! - `CRAWLER_MARKET_HOST`: Market host (default: finra-markets.morningstar.com)
//!
//! ## Workers
//! - `CRAWLER_WORKERS`: Number of Tor-bound workers (default: 1)
//! - `CRAWLER_PROXY_BASE_PORT`: SOCKS port of worker 0 (default: 9050)
//! - `CRAWLER_POLL_INTERVAL_SECS`: Seconds between fetches (default: 10)
//! - `CRAWLER_MAX_LOGIN_ATTEMPTS`: Failed logins tolerated (default: 5)
//! - `CRAWLER_MAX_FETCH_FAILURES`: Consecutive failures tolerated, 0 = unlimited (default: 10)
//!
//! ## Proxy
//! - `CRAWLER_PROXY_BINARY`: Tor executable (default: tor)
//! - `CRAWLER_PROXY_DATA_DIR`: Root of per-port data directories
//! - `CRAWLER_CIRCUIT_TIMEOUT_SECS`: Circuit wait after setup (default: 5)
//!
//! ## Observability
//! - `CRAWLER_DEBUG`: Verbose logging (default: false)
//! - `CRAWLER_HEALTH_PORT`: Health check HTTP port, 0 = disabled (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Extra filter directives

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bond_trade_crawler::infrastructure::health::{HealthServer, HealthServerState};
use bond_trade_crawler::infrastructure::metrics;
use bond_trade_crawler::infrastructure::sink::DEFAULT_CAPACITY;
use bond_trade_crawler::infrastructure::telemetry;
use bond_trade_crawler::{
    ChannelSink, CrawlerConfig, WorkerFactory, WorkerPool, init_metrics, run_listener,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config = CrawlerConfig::from_env().context("invalid crawler configuration")?;

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init(config.debug);

    tracing::info!(
        otlp = telemetry_guard.is_exporting(),
        "Starting Bond Trade Crawler"
    );

    // Initialize Prometheus metrics
    let _metrics_handle = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder unavailable");
            None
        }
    };

    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Trade output
    let (sink, trades_rx) = ChannelSink::new(DEFAULT_CAPACITY);
    let listener = tokio::spawn(run_listener(trades_rx, tokio::io::stdout()));

    // Worker pool
    let pool = WorkerPool::new(
        config.pool_config(),
        config.supervisor_config(),
        &config.target_registry()?,
        Arc::new(sink),
        shutdown_token.clone(),
    )
    .context("failed to size worker pool")?;

    // Health server
    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            pool.statuses(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tracing::info!("Crawler ready");

    let mut factory = WorkerFactory::new(&config);
    let reports = pool
        .run(|id, port| factory.build(id, port))
        .await
        .context("failed to wire workers")?;

    let interrupted = shutdown_token.is_cancelled();
    shutdown_token.cancel();
    factory.shutdown().await;

    let mut failed = 0;
    for report in &reports {
        if let Err(e) = &report.outcome {
            metrics::record_termination(e.reason().as_str());
            failed += 1;
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, listener).await {
        Ok(Ok(written)) => tracing::info!(trades = written, "Trade output drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "Trade listener failed"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Trade listener did not drain in time"
        ),
    }

    tracing::info!(workers = reports.len(), failed, "Crawler stopped");

    if !interrupted && failed > 0 {
        anyhow::bail!("{failed} of {} workers terminated", reports.len());
    }
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &CrawlerConfig) {
    tracing::info!(
        market_host = %config.market_host,
        targets = config.targets.len(),
        workers = config.pool.workers,
        base_port = config.pool.base_port,
        poll_interval_secs = config.session.poll_interval.as_secs(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    for target in &config.targets {
        tracing::debug!(
            instrument_id = target.instrument_id(),
            start_date = target.start_date(),
            end_date = target.end_date(),
            "Target"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// Returns early if the token is cancelled elsewhere.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
