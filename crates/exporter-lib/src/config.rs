//! Exporter configuration
//!
//! Settings come from environment variables. Empty values count as unset.

use crate::error::{ExporterError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Aggregates scraped when `AGGREGATES` is not set
pub const DEFAULT_AGGREGATES: &[&str] = &["service", "category"];

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LISTEN_ADDR: &str = ":8080";
const DEFAULT_TABLE_LIMIT: usize = 500;

/// Raw settings as read from the environment
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    opencost_url: Option<String>,
    window: Option<String>,
    cost_metric: Option<String>,
    cost_metrics: Option<String>,
    aggregates: Option<String>,
    refresh_interval: Option<String>,
    http_timeout: Option<String>,
    listen_addr: Option<String>,
    table_limit: Option<String>,
}

/// Validated exporter configuration, immutable after startup
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    /// OpenCost base URL, without trailing slash
    pub opencost_url: String,
    /// Window passed through to every OpenCost query (e.g. "14d")
    pub window: String,
    /// Default cost metric
    pub cost_metric: String,
    /// Cost metrics to scrape, never empty
    pub cost_metrics: Vec<String>,
    /// Aggregate properties to scrape
    pub aggregates: Vec<String>,
    pub refresh_interval: Duration,
    /// Timeout applied to each OpenCost request
    pub http_timeout: Duration,
    pub listen_addr: String,
    /// Page size requested from the table endpoint
    pub table_limit: usize,
}

impl ExporterConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Self::from_raw(settings.try_deserialize()?)
    }

    /// Load configuration from an explicit key/value map using the same
    /// rules as the process environment
    pub fn from_env_map<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let settings = config::Config::builder()
            .add_source(config::Environment::default().source(Some(source)))
            .build()?;

        Self::from_raw(settings.try_deserialize()?)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let opencost_url = required(raw.opencost_url, "OPENCOST_URL")?;
        url::Url::parse(&opencost_url).map_err(|source| ExporterError::InvalidUrl {
            value: opencost_url.clone(),
            source,
        })?;
        let opencost_url = opencost_url.trim_end_matches('/').to_string();

        let window = required(raw.window, "WINDOW")?;
        let cost_metric = required(raw.cost_metric, "COST_METRIC")?;

        let cost_metrics = match non_empty(raw.cost_metrics) {
            Some(s) => parse_list("COST_METRICS", &s)?,
            None => vec![cost_metric.clone()],
        };

        let aggregates = match non_empty(raw.aggregates) {
            Some(s) => parse_list("AGGREGATES", &s)?,
            None => DEFAULT_AGGREGATES.iter().map(|a| a.to_string()).collect(),
        };

        let refresh_interval = match non_empty(raw.refresh_interval) {
            Some(s) => parse_duration("REFRESH_INTERVAL", &s)?,
            None => DEFAULT_REFRESH_INTERVAL,
        };

        let http_timeout = match non_empty(raw.http_timeout) {
            Some(s) => parse_duration("HTTP_TIMEOUT", &s)?,
            None => DEFAULT_HTTP_TIMEOUT,
        };

        let table_limit = match non_empty(raw.table_limit) {
            Some(s) => match s.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                Ok(_) => {
                    return Err(ExporterError::InvalidSetting {
                        key: "TABLE_LIMIT",
                        value: s,
                        reason: "must be greater than zero".to_string(),
                    })
                }
                Err(e) => {
                    return Err(ExporterError::InvalidSetting {
                        key: "TABLE_LIMIT",
                        value: s,
                        reason: e.to_string(),
                    })
                }
            },
            None => DEFAULT_TABLE_LIMIT,
        };

        Ok(Self {
            opencost_url,
            window,
            cost_metric,
            cost_metrics,
            aggregates,
            refresh_interval,
            http_timeout,
            listen_addr: non_empty(raw.listen_addr)
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            table_limit,
        })
    }

    /// Socket address to bind, expanding the `:PORT` shorthand to all interfaces
    pub fn bind_addr(&self) -> String {
        if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn required(value: Option<String>, key: &'static str) -> Result<String> {
    non_empty(value).ok_or(ExporterError::MissingSetting(key))
}

/// Split a comma-separated list, trimming items and dropping empty and
/// repeated ones. First occurrence order is kept.
pub fn parse_list(key: &'static str, raw: &str) -> Result<Vec<String>> {
    let mut items: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !items.iter().any(|seen| seen == item) {
            items.push(item.to_string());
        }
    }

    if items.is_empty() {
        return Err(ExporterError::EmptyList(key));
    }
    Ok(items)
}

/// Parse a human readable duration such as `30s`, `5m` or `1h30m`
pub fn parse_duration(key: &'static str, raw: &str) -> Result<Duration> {
    let duration =
        humantime::parse_duration(raw.trim()).map_err(|source| ExporterError::InvalidDuration {
            key,
            value: raw.to_string(),
            source,
        })?;

    if duration.is_zero() {
        return Err(ExporterError::InvalidSetting {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}
