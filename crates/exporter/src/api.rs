//! HTTP API for Prometheus metrics, health checks and the index page

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use exporter_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    CostMetrics, ExporterConfig,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: Arc<CostMetrics>,
    pub config: ExporterConfig,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: Arc<CostMetrics>,
        config: ExporterConfig,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            config,
        }
    }
}

/// `/readyz` body: readiness plus the outcome of the last cycle
#[derive(Debug, Serialize)]
struct ReadyBody {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    status: ComponentStatus,
    components: HashMap<String, exporter_lib::ComponentHealth>,
}

/// Liveness; OK for as long as the process serves requests
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check response - returns 200 once the initial scrape was attempted
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let health = state.health_registry.health().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = ReadyBody {
        ready: readiness.ready,
        reason: readiness.reason,
        status: health.status,
        components: health.components,
    };

    (status_code, Json(body))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            buffer,
        ),
        Err(err) => {
            error!(error = %err, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string())],
                format!("failed to encode metrics: {err}\n").into_bytes(),
            )
        }
    }
}

/// Plain-text index listing endpoints and the effective configuration
async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let config = &state.config;

    let mut page = String::new();
    let _ = writeln!(page, "OpenCost cloud cost exporter\n");
    let _ = writeln!(page, "Endpoints:");
    let _ = writeln!(page, "  /metrics   Prometheus metrics");
    let _ = writeln!(page, "  /healthz   liveness");
    let _ = writeln!(page, "  /readyz    readiness and last scrape outcome\n");
    let _ = writeln!(page, "Configuration:");
    let _ = writeln!(page, "  opencost_url:     {}", config.opencost_url);
    let _ = writeln!(page, "  window:           {}", config.window);
    let _ = writeln!(page, "  cost_metrics:     {}", config.cost_metrics.join(","));
    let _ = writeln!(page, "  aggregates:       {}", config.aggregates.join(","));
    let _ = writeln!(page, "  refresh_interval: {:?}", config.refresh_interval);
    let _ = writeln!(page, "  http_timeout:     {:?}", config.http_timeout);
    let _ = writeln!(page, "  table_limit:      {}", config.table_limit);

    if let Some(opencost) = health.components.get(components::OPENCOST) {
        let outcome = match opencost.status {
            ComponentStatus::Healthy => "ok".to_string(),
            ComponentStatus::Degraded => format!(
                "failed: {}",
                opencost.message.as_deref().unwrap_or("unknown error")
            ),
        };
        let _ = writeln!(page, "\nLast scrape: {outcome}");
    }
    let _ = writeln!(
        page,
        "Scrape success: {}",
        if state.metrics.scrape_success() { 1 } else { 0 }
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        page,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(addr: String, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
