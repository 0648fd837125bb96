//! # Evolv Storefront API
//!
//! Binary entry point.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  config (TOML + EVOLV_*) ──► Engine (SQLite, gateway, carrier)          │
//! │                                 │                                       │
//! │                 ┌───────────────┴───────────────┐                       │
//! │                 ▼                               ▼                       │
//! │        axum on server.bind_addr        Sweeper (tokio task)             │
//! │                 │                               │                       │
//! │                 └──── SIGINT / SIGTERM ─────────┘ graceful shutdown     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `storefront-api [path/to/engine.toml]`

use std::path::PathBuf;

use anyhow::Context;
use evolv_engine::{Engine, EngineConfig};
use storefront_api::{router, AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting Evolv storefront API...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = EngineConfig::load(config_path).context("loading configuration")?;
    info!(
        bind = %config.server.bind_address(),
        sweeper = config.sweeper.enabled,
        "Configuration loaded"
    );

    let engine = Engine::from_config(&config)
        .await
        .context("starting engine")?;

    let sweeper = if config.sweeper.enabled {
        let (sweeper, handle) = engine.sweeper(config.sweeper.clone());
        let task = tokio::spawn(sweeper.run());
        Some((handle, task))
    } else {
        warn!("Sweeper disabled; unpaid orders will not expire");
        None
    };

    let app = router(AppState::new(engine));
    let listener = TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("binding {}", config.server.bind_address()))?;
    info!(addr = %config.server.bind_address(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    if let Some((handle, task)) = sweeper {
        handle.shutdown().await;
        if let Err(e) = task.await {
            warn!(?e, "Sweeper task ended abnormally");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
