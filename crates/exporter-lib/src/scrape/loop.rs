//! Periodic refresh loop
//!
//! Runs scrape cycles on a fixed interval, one at a time, and records each
//! outcome in the health registry and the structured log.

use super::{CycleOutcome, Exporter};
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::observability::ExporterLogger;
use crate::upstream::CostSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

/// Drives [`Exporter::scrape`] on every refresh tick
pub struct RefreshLoop<S> {
    exporter: Arc<Exporter<S>>,
    health: HealthRegistry,
    logger: ExporterLogger,
    interval: Duration,
}

impl<S: CostSource + 'static> RefreshLoop<S> {
    pub fn new(exporter: Arc<Exporter<S>>, health: HealthRegistry, logger: ExporterLogger) -> Self {
        let interval = exporter.config().refresh_interval;
        Self {
            exporter,
            health,
            logger,
            interval,
        }
    }

    /// Run a single cycle and record its outcome
    pub async fn run_once(&self, initial: bool) -> Result<CycleOutcome> {
        let start = Instant::now();
        let result = self.exporter.scrape().await;

        match &result {
            Ok(CycleOutcome::Completed { series }) => {
                self.logger.log_scrape_completed(*series, start.elapsed());
                self.health.set_healthy(components::OPENCOST).await;
            }
            Ok(CycleOutcome::Skipped) => self.logger.log_scrape_skipped(),
            Err(err) => {
                self.logger
                    .log_scrape_failed(initial, &err.to_string(), start.elapsed());
                self.health
                    .set_degraded(components::OPENCOST, err.to_string())
                    .await;
            }
        }

        result
    }

    /// Refresh until a shutdown signal arrives.
    ///
    /// The first tick is one full interval away; the initial scrape is the
    /// caller's job.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting refresh loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are logged and reflected in health by run_once
                    let _ = self.run_once(false).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down refresh loop");
                    break;
                }
            }
        }
    }
}
