//! Cloud Cost Exporter - OpenCost cloud cost data as Prometheus metrics
//!
//! Polls the OpenCost cloud cost API on a fixed interval and serves the
//! latest snapshot on `/metrics`.

use exporter_lib::{
    health::{components, HealthRegistry},
    CostMetrics, Exporter, ExporterConfig, ExporterLogger, OpenCostClient, RefreshLoop,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cloudcost-exporter");

    // Load configuration
    let config = ExporterConfig::load()?;
    info!(opencost_url = %config.opencost_url, window = %config.window, "Exporter configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::OPENCOST).await;

    let metrics = Arc::new(CostMetrics::new()?);
    let client = OpenCostClient::new(&config)?;

    let logger = ExporterLogger::new(&config.opencost_url, &config.window);
    logger.log_startup(
        EXPORTER_VERSION,
        &config.listen_addr,
        &config.cost_metrics,
        &config.aggregates,
        config.refresh_interval,
    );

    let exporter = Arc::new(Exporter::new(config.clone(), client, metrics.clone()));
    let refresh = RefreshLoop::new(exporter, health_registry.clone(), logger.clone());

    // Upstream failures are logged and retried on the next tick; a broken
    // metrics registry is not
    if let Err(err) = refresh.run_once(true).await {
        if err.is_fatal() {
            logger.log_shutdown("fatal error during initial scrape");
            return Err(err.into());
        }
    }
    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let refresh_handle = tokio::spawn(refresh.run(shutdown_rx));

    // Start metrics and health server
    let app_state = Arc::new(api::AppState::new(
        health_registry,
        metrics,
        config.clone(),
    ));
    let api_handle = tokio::spawn(api::serve(config.bind_addr(), app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(err)) => {
                    error!(error = %err, "API server failed");
                    logger.log_shutdown("API server failed");
                }
                Err(err) => {
                    error!(error = %err, "API server task panicked");
                    logger.log_shutdown("API server task panicked");
                }
            }
        }
    }

    let _ = shutdown_tx.send(());
    let _ = refresh_handle.await;
    info!("Shutting down");

    Ok(())
}
