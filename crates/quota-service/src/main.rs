//! Quota ledger service - runs the refresh scheduler over the configured store.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quota_core::SystemClock;
use quota_service::{open_store, AppState, ServiceConfig, ServiceError};

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quota_service=debug,quota_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting quota ledger service");

    // Load configuration from environment
    let config = ServiceConfig::from_env()?;

    tracing::info!(
        data_dir = %config.data_dir,
        store_backend = ?config.store_backend,
        refresh_interval_secs = config.refresh_interval.as_secs(),
        refresh_shards = config.refresh_shards,
        cooldown_window_secs = config.cooldown_window_seconds,
        daily_reset_hour = config.daily_reset_hour,
        "Service configuration loaded"
    );

    let store = open_store(&config)?;
    let state = AppState::new(store, config, Arc::new(SystemClock));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(state.scheduler().run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "Refresh scheduler task failed");
    }

    Ok(())
}
