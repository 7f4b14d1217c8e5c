// crates/server/src/main.rs
//! Bidsify server binary.
//!
//! Parses configuration, starts tracing and metrics, then serves the API and
//! web UI until interrupted.

use anyhow::{Context, Result};
use bidsify_observability::init_tracing;
use bidsify_server::{create_app, init_metrics, AppState, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config();

    init_tracing(config.log_format);
    init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        python = %config.tool.python(),
        script = %config.tool.script().display(),
        max_jobs = config.max_jobs,
        "Starting bidsify server"
    );
    if !config.tool.script().exists() {
        tracing::warn!(
            script = %config.tool.script().display(),
            "Tool script not found; jobs will fail until it is installed"
        );
    }

    let state = AppState::new(&config);
    let app = create_app(state, config.static_dir.clone());

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
