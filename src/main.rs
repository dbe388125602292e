//! LendFlow Orchestrator - Swap-then-supply coordination for cross-chain deposits
//!
//! This service owns the deposit dialog lifecycle: it initiates cross-chain
//! swaps through the transfer provider, tracks them to completion, hands the
//! swap outputs back into the position form, and dispatches the final supply
//! through the lending planner.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod api;
mod config;
mod error;
mod events;
mod flow;
mod metrics;
mod notify;
mod position;
mod supply;
mod transfer;

use config::Settings;
use flow::FlowEngine;
use metrics::MetricsServer;
use notify::{LogNotifier, UserNotifier, WebhookNotifier};
use supply::{HealthFactorPreview, HttpSupplyPlanner, SupplyCapabilities, SupplyDispatcher};
use transfer::HttpTransferProvider;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!(
        "Starting LendFlow Orchestrator v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize the transfer provider client
    let transfer = Arc::new(HttpTransferProvider::new(&settings.transfer)?);
    info!(
        "Transfer provider initialized with {} endpoints",
        settings.transfer.api_urls.len()
    );

    // Initialize the supply planner client
    let planner = Arc::new(HttpSupplyPlanner::new(&settings.supply)?);
    let capabilities = if settings.supply.enable_health_factor_preview {
        let preview: Arc<dyn HealthFactorPreview> = planner.clone();
        SupplyCapabilities {
            health_factor: Some(preview),
        }
    } else {
        SupplyCapabilities::default()
    };
    let dispatcher = SupplyDispatcher::new(planner, capabilities, &settings)?;
    info!("Supply dispatcher initialized");

    // Pick the notification sink
    let notifier: Arc<dyn UserNotifier> = match settings.notifications.slack_webhook_url.as_deref()
    {
        Some(url) if !url.is_empty() => {
            info!("Swap failure notifications delivered via webhook");
            Arc::new(WebhookNotifier::new(url.to_string())?)
        }
        _ => {
            info!("Swap failure notifications logged only");
            Arc::new(LogNotifier)
        }
    };

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Initialize the flow engine
    let engine = Arc::new(FlowEngine::new(&settings, transfer, dispatcher, notifier));
    info!("Flow engine initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let settings = settings.clone();
        let engine = engine.clone();
        async move {
            if let Err(e) = api::run_server(settings.api, engine).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if let Some(server) = metrics_server {
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start flow engine
    let engine_handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            if let Err(e) = engine.run().await {
                error!("Flow engine error: {}", e);
            }
        }
    });

    info!("LendFlow Orchestrator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    engine.stop().await;

    // Abort background tasks
    api_handle.abort();
    engine_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("LendFlow Orchestrator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lendflow_orchestrator=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
