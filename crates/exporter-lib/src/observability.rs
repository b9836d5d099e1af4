//! Structured logging for exporter lifecycle events
//!
//! Events carry an `event` field so log pipelines can filter on them; the
//! binary renders them as JSON through `tracing-subscriber`.

use std::time::Duration;
use tracing::{info, warn};

/// Structured logger for exporter events
#[derive(Debug, Clone)]
pub struct ExporterLogger {
    opencost_url: String,
    window: String,
}

impl ExporterLogger {
    pub fn new(opencost_url: impl Into<String>, window: impl Into<String>) -> Self {
        Self {
            opencost_url: opencost_url.into(),
            window: window.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(
        &self,
        version: &str,
        listen_addr: &str,
        cost_metrics: &[String],
        aggregates: &[String],
        refresh_interval: Duration,
    ) {
        info!(
            event = "exporter_started",
            opencost_url = %self.opencost_url,
            window = %self.window,
            exporter_version = %version,
            listen_addr = %listen_addr,
            cost_metrics = %cost_metrics.join(","),
            aggregates = %aggregates.join(","),
            refresh_interval_secs = refresh_interval.as_secs(),
            "Cloud cost exporter started"
        );
    }

    /// Log a successful scrape cycle
    pub fn log_scrape_completed(&self, series: usize, elapsed: Duration) {
        info!(
            event = "scrape_completed",
            opencost_url = %self.opencost_url,
            window = %self.window,
            series = series,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scrape from OpenCost succeeded"
        );
    }

    /// Log a failed scrape cycle; the exporter keeps running
    pub fn log_scrape_failed(&self, initial: bool, error: &str, elapsed: Duration) {
        warn!(
            event = "scrape_failed",
            opencost_url = %self.opencost_url,
            window = %self.window,
            initial = initial,
            error = %error,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scrape from OpenCost failed, series cleared until next refresh"
        );
    }

    /// Log a tick dropped because the previous cycle was still running
    pub fn log_scrape_skipped(&self) {
        warn!(
            event = "scrape_skipped",
            opencost_url = %self.opencost_url,
            "Previous scrape still running, skipping this refresh"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            opencost_url = %self.opencost_url,
            reason = %reason,
            "Cloud cost exporter shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_logger_creation() {
        let logger = ExporterLogger::new("http://opencost:9003", "14d");
        assert_eq!(logger.opencost_url, "http://opencost:9003");
        assert_eq!(logger.window, "14d");

        // No subscriber installed; these must not panic
        logger.log_scrape_completed(10, Duration::from_millis(250));
        logger.log_scrape_failed(true, "status http status 503", Duration::from_millis(5));
        logger.log_scrape_skipped();
    }
}
