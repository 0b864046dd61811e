//! Named, typed metric storage
//!
//! The registry is the single place where sampled values live. Writers take a
//! short exclusive lock per record; readers get a full copy through
//! [`MetricRegistry::snapshot`] so evaluation never observes a half-applied
//! update.

use crate::error::{MonitorError, MonitorResult};

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// How recorded values are folded into the current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    /// Last write wins
    Gauge,
    /// Writes are added to the running total
    Counter,
    /// Mean over the last `window` writes
    RollingAverage { window: usize },
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::RollingAverage { window } => write!(f, "rolling_average({})", window),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricMetadata {
    pub category: String,
    pub unit: Option<String>,
    pub description: Option<String>,
}

impl MetricMetadata {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            unit: None,
            description: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

#[derive(Debug)]
struct MetricEntry {
    kind: MetricKind,
    metadata: MetricMetadata,
    value: f64,
    tags: HashMap<String, String>,
    last_updated: Option<DateTime<Utc>>,
    sample_count: u64,
    window: VecDeque<f64>,
}

impl MetricEntry {
    fn new(kind: MetricKind, metadata: MetricMetadata) -> Self {
        let capacity = match kind {
            MetricKind::RollingAverage { window } => window.max(1),
            _ => 0,
        };
        Self {
            kind,
            metadata,
            value: 0.0,
            tags: HashMap::new(),
            last_updated: None,
            sample_count: 0,
            window: VecDeque::with_capacity(capacity),
        }
    }

    fn apply(&mut self, value: f64) {
        match self.kind {
            MetricKind::Gauge => self.value = value,
            MetricKind::Counter => self.value += value,
            MetricKind::RollingAverage { window } => {
                let window = window.max(1);
                while self.window.len() >= window {
                    self.window.pop_front();
                }
                self.window.push_back(value);
                self.value = self.window.iter().sum::<f64>() / self.window.len() as f64;
            }
        }
        self.sample_count += 1;
        self.last_updated = Some(Utc::now());
    }

    fn to_value(&self, name: &str) -> MetricValue {
        MetricValue {
            name: name.to_string(),
            kind: self.kind,
            category: self.metadata.category.clone(),
            unit: self.metadata.unit.clone(),
            value: self.value,
            tags: self.tags.clone(),
            last_updated: self.last_updated,
            sample_count: self.sample_count,
        }
    }
}

/// A metric as seen by readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub name: String,
    pub kind: MetricKind,
    pub category: String,
    pub unit: Option<String>,
    pub value: f64,
    pub tags: HashMap<String, String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub sample_count: u64,
}

/// Point-in-time copy of every registered metric
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: Option<DateTime<Utc>>,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl MetricsSnapshot {
    /// Current value of `name`, `None` if it was never registered or never written
    pub fn value(&self, name: &str) -> Option<f64> {
        self.metrics
            .get(name)
            .filter(|m| m.sample_count > 0)
            .map(|m| m.value)
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Flat name → value map, as attached to alerts and health entries
    pub fn values(&self) -> HashMap<String, f64> {
        self.metrics
            .iter()
            .filter(|(_, m)| m.sample_count > 0)
            .map(|(k, m)| (k.clone(), m.value))
            .collect()
    }

    /// Render in the Prometheus text exposition format
    pub fn to_prometheus_text(&self) -> MonitorResult<String> {
        let registry = Registry::new_custom(Some("tradewatch".to_string()), None)?;

        for metric in self.metrics.values() {
            let help = format!("{} ({})", metric.category, metric.kind);
            let mut opts = Opts::new(sanitize_metric_name(&metric.name), help);
            for (key, value) in &metric.tags {
                opts = opts.const_label(sanitize_label_name(key), value.clone());
            }

            let collector: Box<dyn prometheus::core::Collector> = match metric.kind {
                MetricKind::Counter if metric.value >= 0.0 => {
                    let counter = Counter::with_opts(opts)?;
                    counter.inc_by(metric.value);
                    Box::new(counter)
                }
                _ => {
                    let gauge = Gauge::with_opts(opts)?;
                    gauge.set(metric.value);
                    Box::new(gauge)
                }
            };

            // per-symbol names can collapse onto the same sanitized name
            if let Err(e) = registry.register(collector) {
                debug!("Skipping metric {} in export: {}", metric.name, e);
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MonitorError::Export(e.to_string()))
    }
}

fn sanitize_metric_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn sanitize_label_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if out.starts_with("__") {
        out.insert_str(0, "tag");
    }
    out
}

#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: RwLock<HashMap<String, MetricEntry>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`. Registering the same name with the same kind again is a no-op.
    pub fn register(&self, name: &str, kind: MetricKind, metadata: MetricMetadata) -> MonitorResult<()> {
        let mut metrics = self.metrics.write();
        if let Some(existing) = metrics.get(name) {
            if existing.kind == kind {
                return Ok(());
            }
            return Err(MonitorError::DuplicateMetric {
                name: name.to_string(),
                existing: existing.kind.to_string(),
                requested: kind.to_string(),
            });
        }

        debug!("Registered metric {} as {}", name, kind);
        metrics.insert(name.to_string(), MetricEntry::new(kind, metadata));
        Ok(())
    }

    /// Fold `value` into `name` according to its kind; `tags` are merged into the metric's tag set
    pub fn record(&self, name: &str, value: f64, tags: Option<HashMap<String, String>>) -> MonitorResult<()> {
        if !value.is_finite() {
            return Err(MonitorError::InvalidValue {
                name: name.to_string(),
                reason: format!("{} is not finite", value),
            });
        }

        let mut metrics = self.metrics.write();
        let entry = metrics
            .get_mut(name)
            .ok_or_else(|| MonitorError::UnknownMetric(name.to_string()))?;

        if entry.kind == MetricKind::Counter && value < 0.0 {
            return Err(MonitorError::InvalidValue {
                name: name.to_string(),
                reason: "counters cannot decrease".to_string(),
            });
        }

        entry.apply(value);
        if let Some(tags) = tags {
            entry.tags.extend(tags);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self.metrics.read();
        MetricsSnapshot {
            taken_at: Some(Utc::now()),
            metrics: metrics
                .iter()
                .map(|(name, entry)| (name.clone(), entry.to_value(name)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.read().get(name).map(|entry| entry.to_value(name))
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.metrics
            .read()
            .get(name)
            .filter(|entry| entry.sample_count > 0)
            .map(|entry| entry.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.read().contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics.read().get(name).map(|entry| entry.kind)
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }
}
