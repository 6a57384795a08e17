//! Swap Relayer - cross-chain router swap settlement
//!
//! This relayer takes swaps verified on their source chain, settles them on
//! the destination chain through the MPC signer and tracks each settlement
//! until it is stable, with operator endpoints for recovery.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod admin;
mod api;
mod chain;
mod config;
mod coordination;
mod error;
mod metrics;
mod state;
mod status;
mod tx;

use admin::AdminOps;
use chain::ChainManager;
use config::Settings;
use coordination::{SwapEngine, SwapIntake};
use metrics::MetricsServer;
use state::{MemorySwapStore, PgSwapStore, StateManager, SwapRepository};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    init_logging(settings.logging.json);

    info!("Starting Swap Relayer v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize the swap store
    let repo: Arc<dyn SwapRepository> = if settings.database.is_memory() {
        warn!("Using in-memory swap store, records are lost on restart");
        Arc::new(MemorySwapStore::new())
    } else {
        let store = PgSwapStore::new(&settings.database)
            .await
            .context("connecting to the swap store")?;
        store.run_migrations().await?;
        Arc::new(store)
    };
    let state_manager = Arc::new(StateManager::new(
        repo,
        settings.relayer.max_count_of_results,
    ));

    // Initialize chain manager (one bridge per destination chain)
    let chain_manager = Arc::new(ChainManager::new(&settings).await?);
    info!("Chain connections initialized");

    let intake = Arc::new(SwapIntake::new(state_manager.clone(), &settings)?);
    let admin = Arc::new(AdminOps::new(state_manager.clone(), chain_manager.clone()));
    if settings.api.admin_token.as_deref().map_or(true, str::is_empty) {
        warn!("No admin token configured, operator endpoints are disabled");
    }

    let engine = Arc::new(SwapEngine::new(
        state_manager.clone(),
        chain_manager.clone(),
        settings.relayer.clone(),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let app_state = api::AppState {
            state_manager: state_manager.clone(),
            chain_manager: chain_manager.clone(),
            admin,
            intake,
            admin_token: settings.api.admin_token.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, app_state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = settings.metrics.enabled.then(|| {
        let server = MetricsServer::new(settings.metrics.port);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start settlement engine
    let engine_handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            if let Err(e) = engine.run().await {
                error!("Swap engine error: {}", e);
            }
        }
    });

    // Store health loop
    let health_handle = tokio::spawn({
        let state_manager = state_manager.clone();
        let interval = settings.relayer.health_check_interval_secs.max(1);
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;
                if let Err(e) = state_manager.health_check().await {
                    warn!("Database health check failed: {}", e);
                }
            }
        }
    });

    info!("Swap Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    engine.stop().await;
    if let Err(e) = engine_handle.await {
        warn!("Swap engine task ended abnormally: {}", e);
    }

    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swap Relayer stopped");
    Ok(())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swap_relayer=debug,sqlx=warn,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
