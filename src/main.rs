//! ==============================================================================
//! main.rs - parking relay entry point
//! ==============================================================================
//!
//! purpose:
//!     runs one of two roles, picked by `role` in relay.toml:
//!     - relay: http server holding the live device state for the ESP32
//!       parking monitor and its dashboards
//!     - monitor: polls a relay and logs the reconciled, flicker-free view
//!
//! architecture (relay role):
//!
//!     ┌────────────┐  POST /api/update   ┌──────────────────────────────┐
//!     │   esp32    │ ──────────────────▶ │ relay (this process)         │
//!     └────────────┘                     │  ┌────────┐   ┌───────────┐  │
//!                                        │  │ store  │──▶│ history   │  │
//!     ┌────────────┐  GET /api/update    │  │(mutex) │   │ forwarder │  │
//!     │ dashboards │ ◀────────────────── │  └────────┘   └───────────┘  │
//!     └────────────┘                     └──────────────────────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use parking_relay::clock::{Clock, SystemClock};
use parking_relay::config::{RelayConfig, Role};
use parking_relay::history::{HistoryForwarder, HistoryLog, HistoryTarget};
use parking_relay::server::{self, RelayState};
use parking_relay::{DeviceStateStore, PollerHandle};

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration and start logging at the configured level
    let config = load_config()?;
    config.log_summary();

    match config.role {
        Role::Relay => run_relay(config).await,
        Role::Monitor => run_monitor(config).await,
    }
}

fn load_config() -> Result<RelayConfig> {
    // the level lives in the file being loaded, so loading logs through a
    // temporary subscriber. RUST_LOG wins over the configured level.
    let fallback = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    let config = tracing::subscriber::with_default(fallback, RelayConfig::load_or_default)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(config)
}

// ==============================================================================
// relay role
// ==============================================================================

async fn run_relay(config: RelayConfig) -> Result<()> {
    tracing::info!("starting parking relay");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bands = config.spot_bands();

    // step 2: device state, owned here and injected into the router
    let store = Arc::new(DeviceStateStore::new(config.store_settings(), clock.clone()));

    // step 3: history forwarding
    let (history, history_log, worker) = if !config.history.enabled {
        (HistoryForwarder::disabled(), None, None)
    } else if let Some(url) = &config.history.forward_url {
        let target = HistoryTarget::remote(url.clone(), config.history.forward_timeout())
            .context("failed to build history client")?;
        let (forwarder, worker) = HistoryForwarder::spawn(target, config.history.queue_depth);
        (forwarder, None, Some(worker))
    } else {
        let log = Arc::new(HistoryLog::new(config.history.capacity, bands.clone(), clock.clone()));
        let (forwarder, worker) = HistoryForwarder::spawn(HistoryTarget::Local(log.clone()), config.history.queue_depth);
        (forwarder, Some(log), Some(worker))
    };

    let state = Arc::new(RelayState {
        store,
        history,
        history_log,
        bands,
        show_sensor_data: config.logging.show_sensor_data,
    });

    // step 4: serve until ctrl-c
    server::run_server(&config.server.bind_addr, state, shutdown_signal()).await?;

    // the router (and its forwarder) is gone, let the worker drain
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "history worker ended abnormally");
        }
    }
    tracing::info!("relay stopped");
    Ok(())
}

// ==============================================================================
// monitor role
// ==============================================================================

async fn run_monitor(config: RelayConfig) -> Result<()> {
    tracing::info!(server_url = %config.monitor.server_url, "starting parking monitor");
    let (poller, _display) = PollerHandle::spawn(config.monitor_settings())?;
    shutdown_signal().await;
    poller.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
