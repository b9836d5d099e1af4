//! Scrape orchestration
//!
//! One cycle fetches integration status, then for every configured cost
//! metric the window total, the daily service graph, and a table plus graph
//! per aggregate. Values are staged into a [`Snapshot`] and published only
//! when every fetch succeeded. The first failure aborts the cycle and wipes
//! the exported cost series, so a broken cycle shows up as missing data with
//! `scrape_success` 0 instead of a plausible partial dataset.

mod r#loop;

pub use r#loop::RefreshLoop;

use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};
use crate::metrics::{
    AggregateKey, CategoryKey, CostKey, CostMetrics, IntegrationKey, RunKey, RunKind, ServiceKey,
    Snapshot,
};
use crate::upstream::{Aggregate, CostSource, DailyPoint, IntegrationStatus, TableRow};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Where the orchestrator is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Applying,
    Failed,
}

impl CycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CycleState::Fetching,
            2 => CycleState::Applying,
            3 => CycleState::Failed,
            _ => CycleState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CycleState::Idle => 0,
            CycleState::Fetching => 1,
            CycleState::Applying => 2,
            CycleState::Failed => 3,
        }
    }
}

/// Result of a call to [`Exporter::scrape`] that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every fetch succeeded and the new data is published
    Completed { series: usize },
    /// Another cycle was already running; nothing was done
    Skipped,
}

/// Clears the busy flag when a cycle ends, including on early return
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn fetch_failed<'a>(
    step: &'static str,
    cost_metric: &'a str,
    aggregate: Option<&'a Aggregate>,
) -> impl FnOnce(ExporterError) -> ExporterError + 'a {
    move |err| {
        warn!(
            step,
            cost_metric,
            aggregate = aggregate.map(Aggregate::as_str),
            error = %err,
            "OpenCost scrape step failed"
        );
        err
    }
}

/// Drives scrape cycles against a [`CostSource`] and publishes into [`CostMetrics`]
pub struct Exporter<S> {
    config: ExporterConfig,
    source: S,
    metrics: Arc<CostMetrics>,
    aggregates: Vec<Aggregate>,
    busy: AtomicBool,
    state: AtomicU8,
}

impl<S: CostSource> Exporter<S> {
    pub fn new(config: ExporterConfig, source: S, metrics: Arc<CostMetrics>) -> Self {
        let aggregates = config
            .aggregates
            .iter()
            .map(|a| Aggregate::from(a.as_str()))
            .collect();

        Self {
            config,
            source,
            metrics,
            aggregates,
            busy: AtomicBool::new(false),
            state: AtomicU8::new(CycleState::Idle.as_u8()),
        }
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn metrics(&self) -> &Arc<CostMetrics> {
        &self.metrics
    }

    pub fn state(&self) -> CycleState {
        CycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CycleState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Run one scrape cycle.
    ///
    /// Returns [`CycleOutcome::Skipped`] without side effects if a cycle is
    /// already in progress.
    pub async fn scrape(&self) -> Result<CycleOutcome> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Scrape already in progress, skipping");
            return Ok(CycleOutcome::Skipped);
        }
        let _busy = BusyGuard(&self.busy);

        let start = Instant::now();
        self.set_state(CycleState::Fetching);

        let result = self.collect().await;

        let outcome = match result {
            Ok(snapshot) => {
                self.set_state(CycleState::Applying);
                let series = snapshot.len();
                self.metrics.publish(snapshot);
                Ok(CycleOutcome::Completed { series })
            }
            Err(err) => {
                self.set_state(CycleState::Failed);
                self.metrics.mark_failed();
                Err(err)
            }
        };

        self.metrics
            .set_scrape_duration(start.elapsed().as_secs_f64());
        self.set_state(CycleState::Idle);
        outcome
    }

    /// Fetch everything for one cycle into a fresh snapshot
    async fn collect(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new()?;

        let status = self
            .source
            .status()
            .await
            .map_err(fetch_failed("status", "", None))?;
        record_status(&mut snapshot, &status);

        let window = self.config.window.as_str();
        let service = Aggregate::service();

        for cost_metric in &self.config.cost_metrics {
            let cost = CostKey::new(window, cost_metric.as_str());

            let total = self
                .source
                .totals(cost_metric)
                .await
                .map_err(fetch_failed("totals", cost_metric, None))?;
            snapshot.set_total_cost(cost.clone(), total);

            // The service graph backs the daily total and daily service
            // families whether or not "service" is a configured aggregate.
            let daily_service = self
                .source
                .graph(&service, cost_metric)
                .await
                .map_err(fetch_failed("graph", cost_metric, Some(&service)))?;
            record_service_graph(&snapshot, &daily_service, &cost)?;

            for aggregate in &self.aggregates {
                let rows = self
                    .source
                    .table(aggregate, cost_metric)
                    .await
                    .map_err(fetch_failed("table", cost_metric, Some(aggregate)))?;
                record_table(&mut snapshot, aggregate, &rows, &cost);

                if aggregate.is_service() {
                    continue;
                }

                let daily = self
                    .source
                    .graph(aggregate, cost_metric)
                    .await
                    .map_err(fetch_failed("graph", cost_metric, Some(aggregate)))?;
                record_aggregate_graph(&snapshot, aggregate, &daily, &cost)?;
            }

            debug!(cost_metric = %cost_metric, staged = snapshot.len(), "Cost metric scraped");
        }

        Ok(snapshot)
    }
}

fn record_status(snapshot: &mut Snapshot, status: &[IntegrationStatus]) {
    for integration in status {
        let up = if integration.is_up() { 1.0 } else { 0.0 };
        snapshot.set_integration_up(
            IntegrationKey {
                key: integration.key.clone(),
                provider: integration.provider.clone(),
                source: integration.source.clone(),
                connection_status: integration.connection_status.clone(),
            },
            up,
        );

        let runs = [
            (RunKind::LastRun, integration.last_run_at()),
            (RunKind::NextRun, integration.next_run_at()),
        ];
        for (which, at) in runs {
            if let Some(at) = at {
                snapshot.set_integration_run_timestamp(
                    RunKey {
                        key: integration.key.clone(),
                        provider: integration.provider.clone(),
                        which,
                    },
                    at.timestamp() as f64,
                );
            }
        }
    }
}

fn record_table(snapshot: &mut Snapshot, aggregate: &Aggregate, rows: &[TableRow], cost: &CostKey) {
    for row in rows {
        let key = AggregateKey {
            aggregate: aggregate.as_str().to_string(),
            name: row.name.clone(),
            cost: cost.clone(),
        };
        snapshot.set_aggregate_cost(key.clone(), row.cost);
        snapshot.set_aggregate_kubernetes_percent(key, row.kubernetes_percent);

        if aggregate.is_service() {
            let key = ServiceKey {
                service: row.name.clone(),
                cost: cost.clone(),
            };
            snapshot.set_service_cost(key.clone(), row.cost);
            snapshot.set_service_kubernetes_percent(key, row.kubernetes_percent);
        }
        if aggregate.is_category() {
            snapshot.set_category_cost(
                CategoryKey {
                    category: row.name.clone(),
                    cost: cost.clone(),
                },
                row.cost,
            );
        }
    }
}

fn record_service_graph(snapshot: &Snapshot, points: &[DailyPoint], cost: &CostKey) -> Result<()> {
    let daily = snapshot.daily();
    let (window, cost_metric) = (cost.window.as_str(), cost.cost_metric.as_str());

    for point in points {
        let day = point.day.as_str();
        daily
            .set_total_cost(day, window, cost_metric, point.total)
            .map_err(invalid_day(cost_metric))?;

        for (service, value) in &point.by_name {
            daily
                .set_aggregate_cost(Aggregate::SERVICE, service, day, window, cost_metric, *value)
                .map_err(invalid_day(cost_metric))?;
            daily
                .set_service_cost(service, day, window, cost_metric, *value)
                .map_err(invalid_day(cost_metric))?;
        }
    }
    Ok(())
}

fn record_aggregate_graph(
    snapshot: &Snapshot,
    aggregate: &Aggregate,
    points: &[DailyPoint],
    cost: &CostKey,
) -> Result<()> {
    let daily = snapshot.daily();
    let (window, cost_metric) = (cost.window.as_str(), cost.cost_metric.as_str());

    for point in points {
        let day = point.day.as_str();
        for (name, value) in &point.by_name {
            daily
                .set_aggregate_cost(aggregate.as_str(), name, day, window, cost_metric, *value)
                .map_err(invalid_day(cost_metric))?;

            if aggregate.is_category() {
                daily
                    .set_category_cost(name, day, window, cost_metric, *value)
                    .map_err(invalid_day(cost_metric))?;
            }
        }
    }
    Ok(())
}

fn invalid_day(cost_metric: &str) -> impl FnOnce(ExporterError) -> ExporterError + '_ {
    move |err| {
        warn!(cost_metric = %cost_metric, error = %err, "Invalid day in OpenCost graph");
        err
    }
}
