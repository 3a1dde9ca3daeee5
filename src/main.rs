//! Auto-Save Engine server
//!
//! Serves the storage engine and the auto-save coordinator over HTTP.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autosave_engine::api::create_router;
use autosave_engine::{spawn_sweep_task, AppState, AutoSaveCoordinator, Config};

/// Main entry point for the auto-save engine server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the storage engine and start the auto-save coordinator
/// 4. Start background expiry sweep task
/// 5. Start HTTP server on configured port
/// 6. On SIGINT/SIGTERM, run termination handling and shut down
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autosave_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting auto-save engine");

    let config = Config::from_env();
    info!(
        namespace = %config.namespace,
        data_dir = %config.data_dir.display(),
        max_storage_bytes = config.max_storage_bytes,
        debounce_ms = config.debounce_ms,
        port = config.server_port,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config).context("failed to open storage")?;
    let recoverable = state
        .autosave
        .init()
        .await
        .context("auto-save coordinator failed to start")?;
    if recoverable > 0 {
        info!(recoverable, path = %config.current_path, "Unsaved work available for recovery");
    }

    let sweep_handle = spawn_sweep_task(
        state.storage.clone(),
        config.storage_config().sweep_interval,
    );
    info!("Background sweep task started");

    let autosave = state.autosave.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(autosave, sweep_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then runs auto-save
/// termination handling and stops the sweep task.
async fn shutdown_signal(autosave: AutoSaveCoordinator, sweep_handle: JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    match autosave.terminate().await {
        Ok(outcome) if outcome.needs_confirmation => {
            warn!(
                flushed = outcome.flushed,
                abandoned = ?outcome.abandoned,
                "Shutting down with unsaved auto-save entries"
            );
        }
        Ok(outcome) => info!(flushed = outcome.flushed, "Auto-save flushed"),
        Err(e) => warn!(error = %e, "Auto-save termination failed"),
    }

    sweep_handle.abort();
    warn!("Sweep task aborted");
}
