//! Daily cost series with explicit sample timestamps
//!
//! OpenCost reports daily costs sparsely and after the fact. Each sample is
//! therefore stamped with UTC midnight of the day it applies to instead of the
//! scrape time, so `offset`-based queries and dashboards line up with
//! calendar days.

use crate::error::{ExporterError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

pub const DAILY_AGGREGATE_COST: &str = "opencost_cloudcost_daily_aggregate_cost";
pub const DAILY_SERVICE_COST: &str = "opencost_cloudcost_daily_service_cost";
pub const DAILY_TOTAL_COST: &str = "opencost_cloudcost_daily_total_cost";
pub const DAILY_CATEGORY_COST: &str = "opencost_cloudcost_daily_category_cost";

const FAMILIES: [(&str, &str, &[&str]); 4] = [
    (
        DAILY_AGGREGATE_COST,
        "Cloud cost by aggregate property per day (from /cloudCost/view/graph).",
        &["aggregate", "name", "day", "window", "cost_metric"],
    ),
    (
        DAILY_SERVICE_COST,
        "Cloud cost by service per day (from /cloudCost/view/graph).",
        &["service", "day", "window", "cost_metric"],
    ),
    (
        DAILY_TOTAL_COST,
        "Total cloud cost per day (sum of items in /cloudCost/view/graph).",
        &["day", "window", "cost_metric"],
    ),
    (
        DAILY_CATEGORY_COST,
        "Cloud cost by category (resource type) per day (from /cloudCost/view/graph).",
        &["category", "day", "window", "cost_metric"],
    ),
];

/// Which daily family a sample belongs to, with its family-specific labels
#[derive(Debug, Clone, PartialEq)]
pub enum DailySeries {
    Aggregate { aggregate: String, name: String },
    Service { service: String },
    Total,
    Category { category: String },
}

impl DailySeries {
    pub fn family(&self) -> &'static str {
        match self {
            DailySeries::Aggregate { .. } => DAILY_AGGREGATE_COST,
            DailySeries::Service { .. } => DAILY_SERVICE_COST,
            DailySeries::Total => DAILY_TOTAL_COST,
            DailySeries::Category { .. } => DAILY_CATEGORY_COST,
        }
    }

    fn family_index(&self) -> usize {
        match self {
            DailySeries::Aggregate { .. } => 0,
            DailySeries::Service { .. } => 1,
            DailySeries::Total => 2,
            DailySeries::Category { .. } => 3,
        }
    }
}

/// One daily value, stamped with the day it applies to
#[derive(Debug, Clone, PartialEq)]
pub struct DailySample {
    pub series: DailySeries,
    pub day: String,
    pub window: String,
    pub cost_metric: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl DailySample {
    /// Build a sample, parsing `day` (`YYYY-MM-DD`) into UTC midnight
    pub fn new(
        series: DailySeries,
        day: &str,
        window: &str,
        cost_metric: &str,
        value: f64,
    ) -> Result<Self> {
        let timestamp = parse_day_utc(day).map_err(|source| ExporterError::InvalidDay {
            day: day.to_string(),
            family: series.family(),
            source,
        })?;

        Ok(Self {
            series,
            day: day.to_string(),
            window: window.to_string(),
            cost_metric: cost_metric.to_string(),
            value,
            timestamp,
        })
    }

    /// Label values in the order of the family's declared label names
    pub fn label_values(&self) -> Vec<&str> {
        let mut values = match &self.series {
            DailySeries::Aggregate { aggregate, name } => vec![aggregate.as_str(), name.as_str()],
            DailySeries::Service { service } => vec![service.as_str()],
            DailySeries::Total => Vec::new(),
            DailySeries::Category { category } => vec![category.as_str()],
        };
        values.extend([
            self.day.as_str(),
            self.window.as_str(),
            self.cost_metric.as_str(),
        ]);
        values
    }
}

/// Parse a `YYYY-MM-DD` day into UTC midnight
pub fn parse_day_utc(day: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

/// Collector for the daily families
///
/// Samples live in a list guarded by a mutex. Scrapes copy the list under the
/// lock and build metric families after releasing it. Clones share the same
/// sample list.
#[derive(Debug, Clone)]
pub struct DailyCollector {
    descs: Vec<Desc>,
    samples: Arc<Mutex<Vec<DailySample>>>,
}

impl DailyCollector {
    pub fn new() -> prometheus::Result<Self> {
        let descs = FAMILIES
            .iter()
            .map(|(name, help, labels)| {
                Desc::new(
                    name.to_string(),
                    help.to_string(),
                    labels.iter().map(|l| l.to_string()).collect(),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self {
            descs,
            samples: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DailySample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one sample
    pub fn add(&self, sample: DailySample) {
        self.lock().push(sample);
    }

    /// Replace every sample with `samples`
    pub fn replace(&self, samples: Vec<DailySample>) {
        *self.lock() = samples;
    }

    /// Drop every sample
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Remove and return every sample
    pub fn take(&self) -> Vec<DailySample> {
        std::mem::take(&mut *self.lock())
    }

    /// Point-in-time copy of the sample list
    pub fn snapshot(&self) -> Vec<DailySample> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn set_aggregate_cost(
        &self,
        aggregate: &str,
        name: &str,
        day: &str,
        window: &str,
        cost_metric: &str,
        value: f64,
    ) -> Result<()> {
        let series = DailySeries::Aggregate {
            aggregate: aggregate.to_string(),
            name: name.to_string(),
        };
        self.add(DailySample::new(series, day, window, cost_metric, value)?);
        Ok(())
    }

    pub fn set_service_cost(
        &self,
        service: &str,
        day: &str,
        window: &str,
        cost_metric: &str,
        value: f64,
    ) -> Result<()> {
        let series = DailySeries::Service {
            service: service.to_string(),
        };
        self.add(DailySample::new(series, day, window, cost_metric, value)?);
        Ok(())
    }

    pub fn set_total_cost(&self, day: &str, window: &str, cost_metric: &str, value: f64) -> Result<()> {
        self.add(DailySample::new(
            DailySeries::Total,
            day,
            window,
            cost_metric,
            value,
        )?);
        Ok(())
    }

    pub fn set_category_cost(
        &self,
        category: &str,
        day: &str,
        window: &str,
        cost_metric: &str,
        value: f64,
    ) -> Result<()> {
        let series = DailySeries::Category {
            category: category.to_string(),
        };
        self.add(DailySample::new(series, day, window, cost_metric, value)?);
        Ok(())
    }
}

fn build_metric(sample: &DailySample, label_names: &[&str]) -> Metric {
    let labels: Vec<LabelPair> = label_names
        .iter()
        .zip(sample.label_values())
        .map(|(name, value)| {
            let mut pair = LabelPair::default();
            pair.set_name(name.to_string());
            pair.set_value(value.to_string());
            pair
        })
        .collect();

    let mut gauge = Gauge::default();
    gauge.set_value(sample.value);

    let mut metric = Metric::default();
    metric.set_label(labels.into());
    metric.set_gauge(gauge);
    metric.set_timestamp_ms(sample.timestamp.timestamp_millis());
    metric
}

impl Collector for DailyCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let samples = self.snapshot();

        let mut families: Vec<MetricFamily> = FAMILIES
            .iter()
            .map(|(name, help, _)| {
                let mut family = MetricFamily::default();
                family.set_name(name.to_string());
                family.set_help(help.to_string());
                family.set_field_type(MetricType::GAUGE);
                family
            })
            .collect();

        for sample in &samples {
            let idx = sample.series.family_index();
            let (name, _, label_names) = FAMILIES[idx];
            let values = sample.label_values();
            if values.len() != label_names.len() {
                warn!(family = name, "Daily metric build failed: label mismatch");
                continue;
            }
            families[idx]
                .mut_metric()
                .push(build_metric(sample, label_names));
        }

        families
            .into_iter()
            .filter(|f| !f.get_metric().is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_day_parses_to_utc_midnight() {
        let ts = parse_day_utc("2025-06-01").unwrap();
        assert_eq!(ts.timestamp(), 1748736000);
        assert_eq!(ts.to_rfc3339(), "2025-06-01T00:00:00+00:00");
    }

    #[test]
    fn test_invalid_day_names_value_and_family() {
        let collector = DailyCollector::new().unwrap();

        let err = collector
            .set_total_cost("2025-12", "14d", "netCost", 1.0)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"2025-12\""), "{msg}");
        assert!(msg.contains(DAILY_TOTAL_COST), "{msg}");
        assert!(!err.is_fatal());

        let err = collector
            .set_category_cost("Compute", "2025-13-01", "14d", "netCost", 1.0)
            .unwrap_err();
        assert!(matches!(
            err,
            ExporterError::InvalidDay {
                family: DAILY_CATEGORY_COST,
                ..
            }
        ));
        assert!(collector.is_empty());
    }

    #[test]
    fn test_collect_carries_day_timestamp() {
        let collector = DailyCollector::new().unwrap();
        collector
            .set_service_cost("AmazonEC2", "2025-06-01", "14d", "netCost", 42.0)
            .unwrap();
        collector
            .set_total_cost("2025-06-01", "14d", "netCost", 50.0)
            .unwrap();

        let families = collector.collect();
        assert_eq!(families.len(), 2);

        let service = families
            .iter()
            .find(|f| f.get_name() == DAILY_SERVICE_COST)
            .unwrap();
        let metric = &service.get_metric()[0];
        assert_eq!(metric.get_timestamp_ms(), 1748736000 * 1000);
        assert_eq!(metric.get_gauge().get_value(), 42.0);

        let labels: Vec<(&str, &str)> = metric
            .get_label()
            .iter()
            .map(|l| (l.get_name(), l.get_value()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("service", "AmazonEC2"),
                ("day", "2025-06-01"),
                ("window", "14d"),
                ("cost_metric", "netCost"),
            ]
        );
    }

    #[test]
    fn test_reset_removes_all_samples() {
        let collector = DailyCollector::new().unwrap();
        collector
            .set_aggregate_cost("item", "a/b/c", "2025-06-01", "14d", "netCost", 1.0)
            .unwrap();
        assert_eq!(collector.len(), 1);

        collector.reset();

        assert!(collector.is_empty());
        assert!(collector.collect().is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_batches() {
        let collector = Arc::new(DailyCollector::new().unwrap());
        let batch: Vec<DailySample> = (1..=28)
            .map(|d| {
                DailySample::new(
                    DailySeries::Total,
                    &format!("2025-02-{:02}", d),
                    "30d",
                    "netCost",
                    d as f64,
                )
                .unwrap()
            })
            .collect();

        let writer = {
            let collector = collector.clone();
            let batch = batch.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    collector.reset();
                    collector.replace(batch.clone());
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let collector = collector.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let n = collector
                            .collect()
                            .iter()
                            .map(|f| f.get_metric().len())
                            .sum::<usize>();
                        assert!(n == 0 || n == 28, "torn read: {n} samples");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(collector.len(), 28);
    }
}
