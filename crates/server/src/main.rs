// crates/server/src/main.rs
//! Questline server binary.
//!
//! Loads configuration, starts the HTTP server, and schedules the stale
//! sweep and (when an endpoint is configured) the sync reconciliation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use questline_auth::TokenSource;
use questline_core::AppConfig;
use questline_db::Database;
use questline_observability::init_tracing;
use questline_server::{create_app, init_metrics, AppState};
use questline_server_jobs::{
    HttpSyncPush, JobRunner, RetryPolicy, Scheduler, StaleSweep, SyncReconciler,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "questline", version, about = "Questline session reconciler")]
struct Cli {
    /// Path to a TOML config file. Defaults to the platform config dir.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // Keep the guard alive so the file writer flushes on exit.
    let _log_guard = init_tracing(&config.logging)?;
    init_metrics();

    let db = Database::open(config.database.path.as_deref()).await?;
    tracing::info!(path = %db.db_path().display(), "Database ready");

    let shutdown = CancellationToken::new();
    let runner = Arc::new(JobRunner::new());
    let mut scheduler = Scheduler::new(Arc::clone(&runner), shutdown.child_token());

    let sweep = StaleSweep::new(db.clone(), config.jobs.stale_threshold());
    let mut triggers = vec![scheduler.every(Arc::new(sweep), config.jobs.sweep_interval())];

    let tokens = TokenSource::from_config(&config.auth)?;
    let push = HttpSyncPush::from_config(&config.sync, tokens)?;
    let sync_enabled = push.is_some();
    match push {
        Some(push) => {
            let reconciler = SyncReconciler::new(db.clone(), push, RetryPolicy::from(&config.sync));
            triggers.push(scheduler.every(Arc::new(reconciler), config.jobs.sync_interval()));
        }
        None => tracing::info!("No sync endpoint configured, sync disabled"),
    }

    let state = AppState::with_jobs(db, runner, triggers, sync_enabled);
    let app = create_app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "Questline listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown requested"),
                _ = serve_shutdown.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    scheduler.shutdown().await;
    tracing::info!("Questline stopped");
    Ok(())
}
