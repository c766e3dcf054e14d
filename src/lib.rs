//! testdeck -- Robot Framework test management daemon.
//!
//! This crate stores testcases, groups, scenarios and key-value settings in
//! SQLite, serves them over a REST API, and executes the external `robot`
//! runner against stored content with live, database-backed run logs.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod runs;
pub mod storage;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::runs::{RunExecutor, RunStore};

/// Open the database and build the shared handles the API needs.
pub async fn build_state(config: AppConfig) -> Result<api::state::AppState> {
    tracing::info!(db_path = %config.database.path.display(), "Initializing database");
    let pool = storage::open_pool(&config.database.path)?;

    let executor = RunExecutor::new(RunStore::new(pool.clone()), config.runner.clone());
    executor.recover().await?;

    Ok(api::state::AppState::new(pool, executor, config))
}

/// Start the testdeck daemon: API server plus run executor.
pub async fn serve(config: AppConfig) -> Result<()> {
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;

    let state = build_state(config).await?;
    let executor = state.executor.clone();
    let app = api::router(state);

    tracing::info!(%addr, "testdeck listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, canceling in-flight runs");
    executor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
