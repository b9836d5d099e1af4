//! Exporter library for OpenCost cloud cost metrics
//!
//! This crate provides the core functionality for:
//! - Environment configuration
//! - Reading the OpenCost cloud cost API
//! - Prometheus metric families, including timestamped daily series
//! - Periodic scrape orchestration
//! - Health checks and observability

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod observability;
pub mod scrape;
pub mod upstream;

pub use config::ExporterConfig;
pub use error::{ExporterError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics::CostMetrics;
pub use observability::ExporterLogger;
pub use scrape::{CycleOutcome, CycleState, Exporter, RefreshLoop};
pub use upstream::{Aggregate, CostSource, OpenCostClient};
