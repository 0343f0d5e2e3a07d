//! benchdash -- status reconciliation for terminal-bench runs.
//!
//! This crate infers per-task `queued | running | passed | failed` status
//! from the artifacts a benchmark harness leaves on disk or in object
//! storage, aggregates them into run records, keeps a persistent registry of
//! object-storage batches, and serves all of it over a small JSON API.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod inference;
pub mod reconcile;
pub mod registry;
pub mod storage;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Start the benchdash API server.
pub async fn serve(config: &Config) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.storage.db_path.to_string_lossy();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;

    // 2. Sources and shared state
    let state = api::state::AppState::from_config(config, pool)?;
    tracing::info!(
        runs_dir = %config.sources.runs_dir.display(),
        bucket = state.bucket.as_ref().map(|b| b.name()).unwrap_or("none"),
        "Artifact sources ready"
    );

    // 3. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let app = api::router(state);

    tracing::info!(%addr, "benchdash listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
