mod config;
mod store;
mod store_manager;
mod checker;
mod transition;
mod batch;
mod monitor;
mod scheduler;
mod correlator;
mod inventory;
mod notify;
mod api;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::checker::Fetcher;
use crate::config::Config;
use crate::inventory::ApiInventory;
use crate::monitor::{CycleSettings, Monitor};
use crate::notify::LogNotifier;
use crate::scheduler::Scheduler;
use crate::store::db::DownDb;
use crate::store::DownStore;
use crate::store_manager::StoreHandle;

/// How long shutdown waits for an in-flight cycle before closing the store
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sitewatchd=info"))
        )
        .init();

    tracing::info!("Starting sitewatchd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/sitewatch/sitewatchd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let db = DownDb::open(&config.store.db_path)?;
    tracing::info!("Opened database at {:?}", config.store.db_path);

    let store = StoreHandle::spawn(db);
    match store.count_down().await {
        Ok(count) => tracing::info!(count, "Sites currently marked down"),
        Err(e) => tracing::warn!("Failed to count down sites: {:#}", e),
    }

    let fetcher = Fetcher::new(&config.checker)?;
    let inventory = ApiInventory::new(&config.inventory)?;

    let monitor = Arc::new(Monitor::new(
        Arc::new(inventory),
        Arc::new(fetcher),
        Arc::new(store.clone()),
        Arc::new(LogNotifier),
        CycleSettings::from(&config.monitor),
    ));

    let cancel = CancellationToken::new();

    let scheduler = Scheduler::start(monitor.clone(), config.monitor.interval(), &cancel);

    let app = api::routes::router(api::routes::AppState {
        monitor: monitor.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    scheduler.stop();
    cancel.cancel();

    if let Err(e) = scheduler.join().await {
        tracing::error!("{:#}", e);
    }
    let _ = server_handle.await;

    if monitor.is_running() {
        tracing::info!("Waiting for the running check cycle to finish");
        if !monitor.wait_idle(SHUTDOWN_GRACE).await {
            tracing::warn!("Check cycle still running after {:?}, its remaining results are dropped", SHUTDOWN_GRACE);
        }
    }

    if let Err(e) = store.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
