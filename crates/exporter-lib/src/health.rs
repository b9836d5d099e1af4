//! Scrape health and readiness
//!
//! The exporter is live whenever it can answer HTTP. It becomes ready after
//! the initial scrape has run, successful or not, because a failed scrape is
//! still reported through `scrape_success`. Each upstream dependency carries
//! the outcome of the most recent cycle for `/readyz` and the index page.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of the most recent cycle against a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last cycle failed; data is withheld until a later cycle succeeds
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    /// Error text of the failed cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds when this outcome was recorded
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self::recorded(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::recorded(ComponentStatus::Degraded, Some(message.into()))
    }

    fn recorded(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Per-dependency outcomes plus their rollup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// One failing dependency degrades the whole exporter
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let failing = components
            .values()
            .any(|c| c.status == ComponentStatus::Degraded);
        if failing {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Names of tracked upstream dependencies
pub mod components {
    pub const OPENCOST: &str = "opencost";
}

#[derive(Debug, Default)]
struct HealthState {
    components: HashMap<String, ComponentHealth>,
    initial_scrape_attempted: bool,
}

/// Shared, cloneable view of scrape health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a dependency; it counts as healthy until a cycle fails
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    /// Record whether the initial scrape has run
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.initial_scrape_attempted = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
        }
    }

    /// Readiness ignores dependency outcomes
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = self.state.read().await.initial_scrape_attempted;
        ReadinessResponse {
            ready,
            reason: (!ready).then(|| "Initial scrape not yet attempted".to_string()),
        }
    }
}
