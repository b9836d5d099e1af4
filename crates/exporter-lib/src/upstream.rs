//! OpenCost cloud cost API client
//!
//! Four read endpoints are consumed: status, totals, table and graph. Every
//! response is wrapped in a `{code, data}` envelope; anything other than an
//! HTTP 2xx with envelope code 200 is a fetch failure.

use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use url::Url;

/// Envelope code OpenCost uses for a successful response
const SUCCESS_CODE: i64 = 200;

/// Aggregate dimension used for a table or graph query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Aggregate {
    /// No aggregate parameter: OpenCost returns fully-qualified per-resource
    /// names (invoiceEntityID/accountID/provider/providerID/category/service)
    Item,
    /// Group by the named property (service, category, accountID, ...)
    Named(String),
}

impl Aggregate {
    pub const SERVICE: &'static str = "service";
    pub const CATEGORY: &'static str = "category";

    pub fn service() -> Self {
        Aggregate::Named(Self::SERVICE.to_string())
    }

    /// Label value used for this aggregate in exported series
    pub fn as_str(&self) -> &str {
        match self {
            Aggregate::Item => "item",
            Aggregate::Named(name) => name,
        }
    }

    /// Value for the `aggregate` query parameter, if any
    fn query_value(&self) -> Option<&str> {
        match self {
            Aggregate::Item => None,
            Aggregate::Named(name) => Some(name),
        }
    }

    pub fn is_service(&self) -> bool {
        self.as_str() == Self::SERVICE
    }

    pub fn is_category(&self) -> bool {
        self.as_str() == Self::CATEGORY
    }
}

impl From<&str> for Aggregate {
    fn from(value: &str) -> Self {
        match value {
            "item" => Aggregate::Item,
            other => Aggregate::Named(other.to_string()),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    data: Option<T>,
}

/// One configured cloud cost integration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegrationStatus {
    #[serde(deserialize_with = "null_as_default")]
    pub key: String,
    #[serde(deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(deserialize_with = "null_as_default")]
    pub provider: String,
    #[serde(deserialize_with = "null_as_default")]
    pub active: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub valid: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub last_run: String,
    #[serde(deserialize_with = "null_as_default")]
    pub next_run: String,
    #[serde(deserialize_with = "null_as_default")]
    pub connection_status: String,
}

impl IntegrationStatus {
    pub fn is_up(&self) -> bool {
        self.active && self.valid
    }

    /// Last run time, if present and well-formed
    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        parse_run_timestamp(&self.last_run)
    }

    /// Next scheduled run time, if present and well-formed
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        parse_run_timestamp(&self.next_run)
    }
}

fn parse_run_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub kubernetes_percent: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub cost: f64,
}

/// Ranked row from the table endpoint
pub type TableRow = CostRecord;

/// Totals endpoint payload; only the combined record is exported
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CombinedTotals {
    #[serde(deserialize_with = "null_as_default")]
    pub combined: CostRecord,
}

/// One time bucket from the graph endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraphBucket {
    #[serde(deserialize_with = "null_as_default")]
    pub start: String,
    #[serde(deserialize_with = "null_as_default")]
    pub end: String,
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<GraphItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraphItem {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub value: f64,
}

/// OpenCost sends `null` for unset fields; treat it like an absent one
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Per-day values derived from one graph bucket
#[derive(Debug, Clone, PartialEq)]
pub struct DailyPoint {
    /// `YYYY-MM-DD`, the first 10 characters of the bucket start
    pub day: String,
    /// Sum of all item values in the bucket
    pub total: f64,
    pub by_name: BTreeMap<String, f64>,
}

/// Truncate an RFC3339 timestamp to its date portion.
///
/// Strings shorter than 10 characters are returned unchanged.
pub fn day_of(start: &str) -> &str {
    match start.char_indices().nth(10) {
        Some((idx, _)) => &start[..idx],
        None => start,
    }
}

/// Convert graph buckets into daily points
pub fn daily_points(buckets: Vec<GraphBucket>) -> Vec<DailyPoint> {
    buckets
        .into_iter()
        .map(|bucket| {
            let mut total = 0.0;
            let mut by_name = BTreeMap::new();
            for item in bucket.items {
                total += item.value;
                by_name.insert(item.name, item.value);
            }
            DailyPoint {
                day: day_of(&bucket.start).to_string(),
                total,
                by_name,
            }
        })
        .collect()
}

/// Read access to cloud cost data
#[async_trait]
pub trait CostSource: Send + Sync {
    /// Integration status for every configured cloud cost source
    async fn status(&self) -> Result<Vec<IntegrationStatus>>;

    /// Combined cost over the window
    async fn totals(&self, cost_metric: &str) -> Result<f64>;

    /// Ranked cost rows for one aggregate
    async fn table(&self, aggregate: &Aggregate, cost_metric: &str) -> Result<Vec<TableRow>>;

    /// Daily series for one aggregate
    async fn graph(&self, aggregate: &Aggregate, cost_metric: &str) -> Result<Vec<DailyPoint>>;
}

/// HTTP client for the OpenCost cloud cost API
#[derive(Debug, Clone)]
pub struct OpenCostClient {
    client: Client,
    base_url: String,
    window: String,
    table_limit: usize,
}

impl OpenCostClient {
    /// Create a client from the exporter configuration
    pub fn new(config: &ExporterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|source| ExporterError::Transport {
                endpoint: "client",
                source,
            })?;

        Ok(Self {
            client,
            base_url: config.opencost_url.trim_end_matches('/').to_string(),
            window: config.window.clone(),
            table_limit: config.table_limit,
        })
    }

    fn endpoint_url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/cloudCost/{}", self.base_url, path);
        Url::parse(&raw).map_err(|source| ExporterError::InvalidUrl { value: raw, source })
    }

    pub fn status_url(&self) -> Result<Url> {
        self.endpoint_url("status")
    }

    pub fn totals_url(&self, cost_metric: &str) -> Result<Url> {
        let mut url = self.endpoint_url("view/totals")?;
        url.query_pairs_mut()
            .append_pair("window", &self.window)
            .append_pair("aggregate", Aggregate::SERVICE)
            .append_pair("accumulate", "day")
            .append_pair("costMetric", cost_metric);
        Ok(url)
    }

    pub fn table_url(&self, aggregate: &Aggregate, cost_metric: &str) -> Result<Url> {
        let mut url = self.endpoint_url("view/table")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("window", &self.window);
            if let Some(agg) = aggregate.query_value() {
                query.append_pair("aggregate", agg);
            }
            query
                .append_pair("accumulate", "day")
                .append_pair("costMetric", cost_metric)
                .append_pair("sortBy", "cost")
                .append_pair("sortByOrder", "desc")
                .append_pair("limit", &self.table_limit.to_string());
        }
        Ok(url)
    }

    pub fn graph_url(&self, aggregate: &Aggregate, cost_metric: &str) -> Result<Url> {
        let mut url = self.endpoint_url("view/graph")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("window", &self.window);
            if let Some(agg) = aggregate.query_value() {
                query.append_pair("aggregate", agg);
            }
            query
                .append_pair("accumulate", "day")
                .append_pair("costMetric", cost_metric);
        }
        Ok(url)
    }

    /// GET a URL and unwrap the `{code, data}` envelope
    async fn get<T>(&self, endpoint: &'static str, url: Url) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        debug!(endpoint, url = %url, "Fetching from OpenCost");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ExporterError::Transport { endpoint, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExporterError::HttpStatus {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| ExporterError::Transport { endpoint, source })?;

        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|source| ExporterError::Decode { endpoint, source })?;

        if envelope.code != SUCCESS_CODE {
            return Err(ExporterError::ResponseCode {
                endpoint,
                code: envelope.code,
            });
        }

        Ok(envelope.data.unwrap_or_default())
    }
}

#[async_trait]
impl CostSource for OpenCostClient {
    async fn status(&self) -> Result<Vec<IntegrationStatus>> {
        self.get("status", self.status_url()?).await
    }

    async fn totals(&self, cost_metric: &str) -> Result<f64> {
        let data: CombinedTotals = self.get("totals", self.totals_url(cost_metric)?).await?;
        Ok(data.combined.cost)
    }

    async fn table(&self, aggregate: &Aggregate, cost_metric: &str) -> Result<Vec<TableRow>> {
        self.get("table", self.table_url(aggregate, cost_metric)?)
            .await
    }

    async fn graph(&self, aggregate: &Aggregate, cost_metric: &str) -> Result<Vec<DailyPoint>> {
        let buckets: Vec<GraphBucket> = self
            .get("graph", self.graph_url(aggregate, cost_metric)?)
            .await?;
        Ok(daily_points(buckets))
    }
}
