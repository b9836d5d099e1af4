//! Structured label keys for the exported gauge families
//!
//! Each key type owns the label names of its family, so label values can
//! only be supplied in the order the family was declared with.

use prometheus::{GaugeVec, Opts};
use std::marker::PhantomData;

/// A set of label values for one gauge family
pub trait LabelKey {
    /// Label names, in declaration order
    const LABELS: &'static [&'static str];

    /// Label values, in the same order as [`LabelKey::LABELS`]
    fn values(&self) -> Vec<&str>;
}

/// Labels of a cloud cost integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationKey {
    pub key: String,
    pub provider: String,
    pub source: String,
    pub connection_status: String,
}

impl LabelKey for IntegrationKey {
    const LABELS: &'static [&'static str] = &["key", "provider", "source", "connection_status"];

    fn values(&self) -> Vec<&str> {
        vec![
            self.key.as_str(),
            self.provider.as_str(),
            self.source.as_str(),
            self.connection_status.as_str(),
        ]
    }
}

/// Which integration run a timestamp refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    LastRun,
    NextRun,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::LastRun => "last_run",
            RunKind::NextRun => "next_run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKey {
    pub key: String,
    pub provider: String,
    pub which: RunKind,
}

impl LabelKey for RunKey {
    const LABELS: &'static [&'static str] = &["key", "provider", "which"];

    fn values(&self) -> Vec<&str> {
        vec![self.key.as_str(), self.provider.as_str(), self.which.as_str()]
    }
}

/// Window and cost metric, shared by every cost family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostKey {
    pub window: String,
    pub cost_metric: String,
}

impl CostKey {
    pub fn new(window: impl Into<String>, cost_metric: impl Into<String>) -> Self {
        Self {
            window: window.into(),
            cost_metric: cost_metric.into(),
        }
    }
}

impl LabelKey for CostKey {
    const LABELS: &'static [&'static str] = &["window", "cost_metric"];

    fn values(&self) -> Vec<&str> {
        vec![self.window.as_str(), self.cost_metric.as_str()]
    }
}

/// Row of the generic per-aggregate families
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateKey {
    pub aggregate: String,
    pub name: String,
    pub cost: CostKey,
}

impl LabelKey for AggregateKey {
    const LABELS: &'static [&'static str] = &["aggregate", "name", "window", "cost_metric"];

    fn values(&self) -> Vec<&str> {
        vec![
            self.aggregate.as_str(),
            self.name.as_str(),
            self.cost.window.as_str(),
            self.cost.cost_metric.as_str(),
        ]
    }
}

/// Row of the service convenience families
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceKey {
    pub service: String,
    pub cost: CostKey,
}

impl LabelKey for ServiceKey {
    const LABELS: &'static [&'static str] = &["service", "window", "cost_metric"];

    fn values(&self) -> Vec<&str> {
        vec![self.service.as_str(), self.cost.window.as_str(), self.cost.cost_metric.as_str()]
    }
}

/// Row of the category convenience family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryKey {
    pub category: String,
    pub cost: CostKey,
}

impl LabelKey for CategoryKey {
    const LABELS: &'static [&'static str] = &["category", "window", "cost_metric"];

    fn values(&self) -> Vec<&str> {
        vec![self.category.as_str(), self.cost.window.as_str(), self.cost.cost_metric.as_str()]
    }
}

/// A gauge family whose series are addressed by a typed label key
pub struct GaugeFamily<K> {
    vec: GaugeVec,
    _key: PhantomData<fn(&K)>,
}

impl<K: LabelKey> GaugeFamily<K> {
    pub fn new(name: &str, help: &str) -> prometheus::Result<Self> {
        Ok(Self {
            vec: GaugeVec::new(Opts::new(name, help), K::LABELS)?,
            _key: PhantomData,
        })
    }

    /// Set the series for `key`, creating it if needed
    pub fn set(&self, key: &K, value: f64) {
        self.vec.with_label_values(&key.values()).set(value);
    }

    /// Remove every series of this family
    pub fn reset(&self) {
        self.vec.reset();
    }

    pub(crate) fn collector(&self) -> Box<GaugeVec> {
        Box::new(self.vec.clone())
    }
}
