// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conductor server binary
//!
//! Loads configuration, wires the store (Postgres when `database_url` is
//! set, in-memory otherwise), and serves the coordination API. A background
//! interval drives the claim/lease expiry sweeps; every other state
//! transition happens inside request handlers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conductor_core::domain::config::ConductorConfig;
use conductor_core::domain::store::Store;
use conductor_core::infrastructure::{Database, InMemoryStore, LlmGateway, PostgresStore};
use conductor_core::presentation::{app, AppState};

/// Conductor - multi-agent coordination server
#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, env = "CONDUCTOR_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind host (overrides config)
    #[arg(long, env = "CONDUCTOR_HOST")]
    host: Option<String>,

    /// Bind port (overrides config)
    #[arg(long, env = "CONDUCTOR_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CONDUCTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Seconds between expiry sweep passes
    #[arg(long, env = "CONDUCTOR_SWEEP_INTERVAL", default_value = "30")]
    sweep_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let mut config =
        ConductorConfig::load_or_default(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate().context("configuration validation failed")?;
    let config = Arc::new(config);

    let store: Arc<dyn Store> = if config.database_url.is_empty() {
        warn!("no database_url configured, using the in-memory store (state is not durable)");
        Arc::new(InMemoryStore::new())
    } else {
        let db = Database::connect(&config.database_url)
            .await
            .context("connecting to Postgres")?;
        db.apply_schema().await.context("applying schema")?;
        info!("connected to Postgres");
        Arc::new(PostgresStore::new(&db))
    };

    let gateway = Arc::new(LlmGateway::from_config(&config.llm).context("initializing LLM gateway")?);
    if let Err(e) = gateway.health_check().await {
        warn!("LLM provider health check failed: {} (planning will fall back)", e);
    }

    let state = AppState::build(config.clone(), store, gateway)?;

    // Periodic lease recovery: expired claims revert to READY, dead file
    // leases are dropped.
    {
        let sweeper = state.clone();
        let interval = Duration::from_secs(cli.sweep_interval.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match sweeper.scheduler.sweep_expired().await {
                    Ok(summary) => {
                        if !summary.reclaimed_tasks.is_empty() || !summary.expired_locks.is_empty()
                        {
                            info!(
                                tasks = summary.reclaimed_tasks.len(),
                                locks = summary.expired_locks.len(),
                                "expiry sweep reclaimed leases"
                            );
                        }
                    }
                    Err(e) => warn!("expiry sweep failed: {}", e),
                }
            }
        });
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    info!("conductor listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("conductor shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
