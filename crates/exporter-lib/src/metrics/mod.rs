//! Prometheus metrics exported for OpenCost cloud cost data
//!
//! [`CostMetrics`] owns its own registry rather than the process-wide default,
//! so every test can build an isolated instance. A scrape cycle stages values
//! into a [`Snapshot`] and publishes it in one step; exposition reads and
//! publishes are serialized by a gate so a reader never sees a cycle
//! half-applied.

mod daily;
mod labels;

pub use daily::{
    parse_day_utc, DailyCollector, DailySample, DailySeries, DAILY_AGGREGATE_COST,
    DAILY_CATEGORY_COST, DAILY_SERVICE_COST, DAILY_TOTAL_COST,
};
pub use labels::{
    AggregateKey, CategoryKey, CostKey, GaugeFamily, IntegrationKey, LabelKey, RunKey, RunKind,
    ServiceKey,
};

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, Registry, TextEncoder};
use std::sync::{PoisonError, RwLock};

pub const SCRAPE_SUCCESS: &str = "opencost_cloudcost_exporter_scrape_success";
pub const SCRAPE_DURATION_SECONDS: &str = "opencost_cloudcost_exporter_scrape_duration_seconds";
pub const INTEGRATION_UP: &str = "opencost_cloudcost_integration_up";
pub const INTEGRATION_RUN_TIMESTAMP: &str = "opencost_cloudcost_integration_run_timestamp";
pub const TOTAL_COST: &str = "opencost_cloudcost_total_cost";
pub const AGGREGATE_COST: &str = "opencost_cloudcost_aggregate_cost";
pub const AGGREGATE_KUBERNETES_PERCENT: &str = "opencost_cloudcost_aggregate_kubernetes_percent";
pub const SERVICE_COST: &str = "opencost_cloudcost_service_cost";
pub const SERVICE_KUBERNETES_PERCENT: &str = "opencost_cloudcost_service_kubernetes_percent";
pub const CATEGORY_COST: &str = "opencost_cloudcost_category_cost";

/// Values collected during one scrape cycle, not yet visible to readers
#[derive(Debug, Clone)]
pub struct Snapshot {
    integration_up: Vec<(IntegrationKey, f64)>,
    integration_run_timestamp: Vec<(RunKey, f64)>,
    total_cost: Vec<(CostKey, f64)>,
    aggregate_cost: Vec<(AggregateKey, f64)>,
    aggregate_kubernetes_percent: Vec<(AggregateKey, f64)>,
    service_cost: Vec<(ServiceKey, f64)>,
    service_kubernetes_percent: Vec<(ServiceKey, f64)>,
    category_cost: Vec<(CategoryKey, f64)>,
    /// Unregistered collector used as a staging area for daily samples
    daily: DailyCollector,
}

impl Snapshot {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            integration_up: Vec::new(),
            integration_run_timestamp: Vec::new(),
            total_cost: Vec::new(),
            aggregate_cost: Vec::new(),
            aggregate_kubernetes_percent: Vec::new(),
            service_cost: Vec::new(),
            service_kubernetes_percent: Vec::new(),
            category_cost: Vec::new(),
            daily: DailyCollector::new()?,
        })
    }

    pub fn set_integration_up(&mut self, key: IntegrationKey, value: f64) {
        self.integration_up.push((key, value));
    }

    pub fn set_integration_run_timestamp(&mut self, key: RunKey, unix_secs: f64) {
        self.integration_run_timestamp.push((key, unix_secs));
    }

    pub fn set_total_cost(&mut self, key: CostKey, value: f64) {
        self.total_cost.push((key, value));
    }

    pub fn set_aggregate_cost(&mut self, key: AggregateKey, value: f64) {
        self.aggregate_cost.push((key, value));
    }

    pub fn set_aggregate_kubernetes_percent(&mut self, key: AggregateKey, value: f64) {
        self.aggregate_kubernetes_percent.push((key, value));
    }

    pub fn set_service_cost(&mut self, key: ServiceKey, value: f64) {
        self.service_cost.push((key, value));
    }

    pub fn set_service_kubernetes_percent(&mut self, key: ServiceKey, value: f64) {
        self.service_kubernetes_percent.push((key, value));
    }

    pub fn set_category_cost(&mut self, key: CategoryKey, value: f64) {
        self.category_cost.push((key, value));
    }

    /// Staged daily samples
    pub fn daily(&self) -> &DailyCollector {
        &self.daily
    }

    /// Number of staged series across all families
    pub fn len(&self) -> usize {
        self.integration_up.len()
            + self.integration_run_timestamp.len()
            + self.total_cost.len()
            + self.aggregate_cost.len()
            + self.aggregate_kubernetes_percent.len()
            + self.service_cost.len()
            + self.service_kubernetes_percent.len()
            + self.category_cost.len()
            + self.daily.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of all exported families
pub struct CostMetrics {
    registry: Registry,
    gate: RwLock<()>,

    scrape_success: Gauge,
    scrape_duration_seconds: Gauge,
    integration_up: GaugeFamily<IntegrationKey>,
    integration_run_timestamp: GaugeFamily<RunKey>,
    total_cost: GaugeFamily<CostKey>,
    aggregate_cost: GaugeFamily<AggregateKey>,
    aggregate_kubernetes_percent: GaugeFamily<AggregateKey>,
    service_cost: GaugeFamily<ServiceKey>,
    service_kubernetes_percent: GaugeFamily<ServiceKey>,
    category_cost: GaugeFamily<CategoryKey>,
    daily: DailyCollector,
}

impl CostMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let scrape_success = Gauge::new(
            SCRAPE_SUCCESS,
            "1 if the last scrape from OpenCost succeeded; 0 otherwise.",
        )?;
        let scrape_duration_seconds = Gauge::new(
            SCRAPE_DURATION_SECONDS,
            "Duration of the last scrape from OpenCost in seconds.",
        )?;
        registry.register(Box::new(scrape_success.clone()))?;
        registry.register(Box::new(scrape_duration_seconds.clone()))?;

        let metrics = Self {
            registry,
            gate: RwLock::new(()),
            scrape_success,
            scrape_duration_seconds,
            integration_up: GaugeFamily::new(
                INTEGRATION_UP,
                "1 if the configured Cloud Cost integration is active+valid; 0 otherwise.",
            )?,
            integration_run_timestamp: GaugeFamily::new(
                INTEGRATION_RUN_TIMESTAMP,
                "Timestamps (unix seconds) for cloud cost integration runs.",
            )?,
            total_cost: GaugeFamily::new(
                TOTAL_COST,
                "Total cloud cost over the configured window.",
            )?,
            aggregate_cost: GaugeFamily::new(
                AGGREGATE_COST,
                "Cloud cost by aggregate property over the configured window.",
            )?,
            aggregate_kubernetes_percent: GaugeFamily::new(
                AGGREGATE_KUBERNETES_PERCENT,
                "KubernetesPercent by aggregate property over the configured window.",
            )?,
            service_cost: GaugeFamily::new(
                SERVICE_COST,
                "Cloud cost by service over the configured window.",
            )?,
            service_kubernetes_percent: GaugeFamily::new(
                SERVICE_KUBERNETES_PERCENT,
                "KubernetesPercent by service over the configured window.",
            )?,
            category_cost: GaugeFamily::new(
                CATEGORY_COST,
                "Cloud cost by category (resource type) over the configured window.",
            )?,
            daily: DailyCollector::new()?,
        };

        metrics.register_families()?;
        Ok(metrics)
    }

    fn register_families(&self) -> prometheus::Result<()> {
        self.registry.register(self.integration_up.collector())?;
        self.registry
            .register(self.integration_run_timestamp.collector())?;
        self.registry.register(self.total_cost.collector())?;
        self.registry.register(self.aggregate_cost.collector())?;
        self.registry
            .register(self.aggregate_kubernetes_percent.collector())?;
        self.registry.register(self.service_cost.collector())?;
        self.registry
            .register(self.service_kubernetes_percent.collector())?;
        self.registry.register(self.category_cost.collector())?;
        self.registry.register(Box::new(self.daily.clone()))?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn daily(&self) -> &DailyCollector {
        &self.daily
    }

    /// Remove every series from every cost family and the daily collector.
    ///
    /// Scrape success and duration are kept.
    pub fn reset_all(&self) {
        self.integration_up.reset();
        self.integration_run_timestamp.reset();
        self.total_cost.reset();
        self.aggregate_cost.reset();
        self.aggregate_kubernetes_percent.reset();
        self.service_cost.reset();
        self.service_kubernetes_percent.reset();
        self.category_cost.reset();
        self.daily.reset();
    }

    /// Replace the exported data with a completed cycle and mark it successful
    pub fn publish(&self, snapshot: Snapshot) {
        let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);

        self.reset_all();
        for (key, value) in &snapshot.integration_up {
            self.integration_up.set(key, *value);
        }
        for (key, value) in &snapshot.integration_run_timestamp {
            self.integration_run_timestamp.set(key, *value);
        }
        for (key, value) in &snapshot.total_cost {
            self.total_cost.set(key, *value);
        }
        for (key, value) in &snapshot.aggregate_cost {
            self.aggregate_cost.set(key, *value);
        }
        for (key, value) in &snapshot.aggregate_kubernetes_percent {
            self.aggregate_kubernetes_percent.set(key, *value);
        }
        for (key, value) in &snapshot.service_cost {
            self.service_cost.set(key, *value);
        }
        for (key, value) in &snapshot.service_kubernetes_percent {
            self.service_kubernetes_percent.set(key, *value);
        }
        for (key, value) in &snapshot.category_cost {
            self.category_cost.set(key, *value);
        }
        self.daily.replace(snapshot.daily.take());
        self.set_scrape_success(true);
    }

    /// Wipe the exported data after a failed cycle and mark it unsuccessful
    pub fn mark_failed(&self) {
        let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);

        self.reset_all();
        self.set_scrape_success(false);
    }

    pub fn set_scrape_success(&self, success: bool) {
        self.scrape_success.set(if success { 1.0 } else { 0.0 });
    }

    pub fn set_scrape_duration(&self, seconds: f64) {
        self.scrape_duration_seconds.set(seconds);
    }

    pub fn scrape_success(&self) -> bool {
        self.scrape_success.get() >= 1.0
    }

    /// Gather every non-empty family from a consistent view
    pub fn gather(&self) -> Vec<MetricFamily> {
        let _guard = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.registry.gather()
    }

    /// Render the Prometheus text exposition format
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let families = self.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(buffer)
    }
}
