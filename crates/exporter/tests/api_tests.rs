//! Integration tests for the exporter API endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use api::{create_router, AppState};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use exporter_lib::{
    error::{ExporterError, Result},
    health::{components, HealthRegistry},
    upstream::{DailyPoint, IntegrationStatus, TableRow},
    Aggregate, CostMetrics, CostSource, Exporter, ExporterConfig,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

/// Canned OpenCost responses; `fail` turns every call into a 503
#[derive(Default)]
struct StubSource {
    fail: AtomicBool,
}

#[async_trait]
impl CostSource for StubSource {
    async fn status(&self) -> Result<Vec<IntegrationStatus>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExporterError::HttpStatus {
                endpoint: "status",
                status: 503,
            });
        }
        Ok(vec![IntegrationStatus {
            key: "123456789012/athena".to_string(),
            source: "athena".to_string(),
            provider: "AWS".to_string(),
            active: true,
            valid: true,
            connection_status: "Successful Connection".to_string(),
            ..Default::default()
        }])
    }

    async fn totals(&self, _cost_metric: &str) -> Result<f64> {
        Ok(42.5)
    }

    async fn table(&self, aggregate: &Aggregate, _cost_metric: &str) -> Result<Vec<TableRow>> {
        Ok(vec![TableRow {
            name: format!("{aggregate}-a"),
            kubernetes_percent: 0.25,
            cost: 30.0,
        }])
    }

    async fn graph(&self, aggregate: &Aggregate, _cost_metric: &str) -> Result<Vec<DailyPoint>> {
        let mut by_name = BTreeMap::new();
        by_name.insert(format!("{aggregate}-a"), 7.5);
        Ok(vec![DailyPoint {
            day: "2025-06-01".to_string(),
            total: 7.5,
            by_name,
        }])
    }
}

fn test_config() -> ExporterConfig {
    ExporterConfig::from_env_map([
        ("OPENCOST_URL", "http://opencost:9003/"),
        ("WINDOW", "14d"),
        ("COST_METRIC", "netCost"),
    ])
    .unwrap()
}

async fn setup_test_app() -> (Router, Arc<AppState>, Exporter<StubSource>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::OPENCOST).await;

    let config = test_config();
    let metrics = Arc::new(CostMetrics::new().unwrap());
    let exporter = Exporter::new(config.clone(), StubSource::default(), metrics.clone());

    let state = Arc::new(AppState::new(health_registry, metrics, config));
    let router = create_router(state.clone());

    (router, state, exporter)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok() {
    let (app, state, _exporter) = setup_test_app().await;

    // Liveness ignores scrape failures
    state
        .health_registry
        .set_degraded(components::OPENCOST, "status http status 503")
        .await;

    let (status, _, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_readyz_returns_503_before_initial_scrape() {
    let (app, _state, _exporter) = setup_test_app().await;

    let (status, _, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], false);
    assert_eq!(readiness["reason"], "Initial scrape not yet attempted");
}

#[tokio::test]
async fn test_readyz_ok_after_failed_initial_scrape() {
    let (app, state, _exporter) = setup_test_app().await;

    // The cycle failing must not keep the exporter unready
    state
        .health_registry
        .set_degraded(components::OPENCOST, "status http status 503")
        .await;
    state.health_registry.set_ready(true).await;

    let (status, _, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], true);
    assert_eq!(readiness["status"], "degraded");
    assert_eq!(
        readiness["components"]["opencost"]["message"],
        "status http status 503"
    );
}

#[tokio::test]
async fn test_metrics_endpoint_serves_published_cycle() {
    let (app, state, exporter) = setup_test_app().await;

    assert_ok!(exporter.scrape().await);
    assert!(state.metrics.scrape_success());

    let (status, content_type, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain; version=0.0.4"));

    assert!(body.contains("opencost_cloudcost_exporter_scrape_success 1"));
    assert!(body.contains("opencost_cloudcost_integration_up{"));
    assert!(body.contains("opencost_cloudcost_service_cost{"));
    assert!(body.contains("opencost_cloudcost_category_cost{"));
    assert!(body.contains(
        "opencost_cloudcost_daily_total_cost{day=\"2025-06-01\",window=\"14d\",cost_metric=\"netCost\"} 7.5 1748736000000"
    ));
}

#[tokio::test]
async fn test_metrics_endpoint_after_failed_cycle() {
    let (app, _state, exporter) = setup_test_app().await;

    assert_ok!(exporter.scrape().await);
    exporter.source().fail.store(true, Ordering::SeqCst);
    assert_err!(exporter.scrape().await);

    let (status, _, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    assert!(body.contains("opencost_cloudcost_exporter_scrape_success 0"));
    assert!(body.contains("opencost_cloudcost_exporter_scrape_duration_seconds"));
    assert!(!body.contains("opencost_cloudcost_total_cost{"));
    assert!(!body.contains("opencost_cloudcost_daily_"));
}

#[tokio::test]
async fn test_index_lists_endpoints_and_config() {
    let (app, state, _exporter) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::OPENCOST, "graph http status 502")
        .await;

    let (status, content_type, body) = get(app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain"));

    assert!(body.contains("/metrics"));
    assert!(body.contains("/healthz"));
    assert!(body.contains("/readyz"));
    assert!(body.contains("opencost_url:     http://opencost:9003\n"));
    assert!(body.contains("aggregates:       service,category"));
    assert!(body.contains("Last scrape: failed: graph http status 502"));
}
