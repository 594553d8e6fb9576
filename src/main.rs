//! Blackbox Tower - real-time security alert dashboard backend
//!
//! Serves the dashboard with:
//! - Live alert stream over WebSocket, fed from the detection pipeline's pub/sub channel
//! - Recent alerts, log search and counters from the alert store

mod alert;
mod config;
mod db;
mod hub;
mod source;
mod web;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    init_logging();
    info!("Starting Blackbox Tower...");

    let config = config::Config::load()?;
    if config.auth.uses_default_secret() {
        warn!("JWT_SECRET not set, using the built-in development secret");
    }
    info!("Configuration loaded");

    let db = db::Database::new(&config.database).await?;
    db.run_migrations().await?;
    info!("Alert store initialized");

    let (hub, hub_task) = hub::Hub::spawn(config.hub.clone());

    let alert_source = source::AlertSource::new(&config.redis)?;
    let source_task = tokio::spawn(alert_source.run(hub.clone()));

    let state = Arc::new(web::AppState {
        hub: hub.clone(),
        store: Arc::new(db.clone()),
    });

    // Closing the hub first ends every WebSocket session, which lets the
    // server's graceful shutdown complete.
    let signal_hub = hub.clone();
    let shutdown = async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_hub.shutdown().await;
    };

    web::start_server(&config.server, state, shutdown).await?;

    source_task.abort();
    hub.shutdown().await;
    hub_task.await?;
    db.close().await;

    info!("Blackbox Tower stopped");
    Ok(())
}

/// Use LOG_FORMAT=gcp for structured GCP Cloud Logging, RUST_LOG for filtering
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
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
}
