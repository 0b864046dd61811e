//! Component health checks
//!
//! Every registered component owns one [`HealthProbe`]. [`HealthChecker::run_all`]
//! runs the probes concurrently, each in its own task under its own timeout,
//! and folds the outcomes into a cached [`ComponentHealth`] per component.
//! Readers only ever see the cache.

use crate::clock::SharedClock;
use crate::config::{HealthConfig, ThresholdConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::metrics::MetricRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Component status, ordered from best to worst by [`HealthStatus::severity_rank`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

impl HealthStatus {
    /// critical > degraded > unknown > healthy
    pub fn severity_rank(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Critical => 3,
        }
    }

    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.severity_rank() > self.severity_rank() { other } else { self }
    }

    /// True when this status is at least as bad as `threshold`
    pub fn at_least(self, threshold: HealthStatus) -> bool {
        self.severity_rank() >= threshold.severity_rank()
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// What a probe reports when it completes
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub message: String,
    pub metrics: Option<HashMap<String, f64>>,
}

impl ProbeOutcome {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metrics: None,
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Critical, message)
    }

    pub fn with_metrics(mut self, metrics: HashMap<String, f64>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Health check for one component
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> MonitorResult<ProbeOutcome>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    pub metrics: Option<HashMap<String, f64>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub response_time_ms: Option<u64>,
}

impl ComponentHealth {
    fn pending(component: &str) -> Self {
        Self {
            component: component.to_string(),
            status: HealthStatus::Unknown,
            message: "Not checked yet".to_string(),
            metrics: None,
            last_checked: None,
            consecutive_failures: 0,
            total_checks: 0,
            response_time_ms: None,
        }
    }
}

struct RegisteredCheck {
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
    failure_threshold: u32,
}

enum ProbeResult {
    Completed(ProbeOutcome),
    Failed(String),
}

pub struct HealthChecker {
    checks: RwLock<HashMap<String, RegisteredCheck>>,
    statuses: RwLock<HashMap<String, ComponentHealth>>,
    default_timeout: Duration,
    default_failure_threshold: u32,
    clock: SharedClock,
}

impl HealthChecker {
    pub fn new(clock: SharedClock, default_timeout: Duration, default_failure_threshold: u32) -> Self {
        Self {
            checks: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            default_timeout,
            default_failure_threshold: default_failure_threshold.max(1),
            clock,
        }
    }

    pub fn from_config(config: &HealthConfig, clock: SharedClock) -> Self {
        Self::new(clock, config.probe_timeout(), config.failure_threshold)
    }

    /// Register a probe with the checker's default timeout and failure threshold
    pub async fn register_check(&self, component: &str, probe: Arc<dyn HealthProbe>) {
        self.register_check_with(component, probe, self.default_timeout, self.default_failure_threshold)
            .await;
    }

    /// Register (or replace) the probe for `component`
    pub async fn register_check_with(
        &self,
        component: &str,
        probe: Arc<dyn HealthProbe>,
        timeout: Duration,
        failure_threshold: u32,
    ) {
        self.checks.write().await.insert(
            component.to_string(),
            RegisteredCheck {
                probe,
                timeout,
                failure_threshold: failure_threshold.max(1),
            },
        );
        self.statuses
            .write()
            .await
            .entry(component.to_string())
            .or_insert_with(|| ComponentHealth::pending(component));
        info!("Registered health check: {} (timeout {:?})", component, timeout);
    }

    pub async fn remove_check(&self, component: &str) -> bool {
        self.statuses.write().await.remove(component);
        self.checks.write().await.remove(component).is_some()
    }

    pub async fn components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.checks.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run every probe concurrently and refresh the cache.
    ///
    /// Errors, timeouts and panics are captured per component; this never fails.
    pub async fn run_all(&self) -> Vec<ComponentHealth> {
        let pending: Vec<(String, Arc<dyn HealthProbe>, Duration, u32)> = {
            let checks = self.checks.read().await;
            checks
                .iter()
                .map(|(name, check)| {
                    (name.clone(), Arc::clone(&check.probe), check.timeout, check.failure_threshold)
                })
                .collect()
        };

        let handles: Vec<_> = pending
            .into_iter()
            .map(|(name, probe, timeout, threshold)| {
                let task = tokio::spawn(async move {
                    let started = Instant::now();
                    let result = match tokio::time::timeout(timeout, probe.check()).await {
                        Ok(Ok(outcome)) => ProbeResult::Completed(outcome),
                        Ok(Err(e)) => ProbeResult::Failed(e.to_string()),
                        Err(_) => ProbeResult::Failed(format!("timed out after {}ms", timeout.as_millis())),
                    };
                    (result, started.elapsed())
                });
                async move {
                    let joined = match task.await {
                        Ok(done) => done,
                        Err(e) if e.is_panic() => (ProbeResult::Failed("probe panicked".to_string()), Duration::ZERO),
                        Err(e) => (ProbeResult::Failed(format!("probe task aborted: {}", e)), Duration::ZERO),
                    };
                    (name, threshold, joined)
                }
            })
            .collect();

        let results = join_all(handles).await;
        let checked_at = self.clock.wall();

        let mut statuses = self.statuses.write().await;
        // same lock order as remove_check
        let checks = self.checks.read().await;
        let mut refreshed = Vec::with_capacity(results.len());
        for (name, threshold, (result, elapsed)) in results {
            if !checks.contains_key(&name) {
                debug!("Dropping result for removed component {}", name);
                continue;
            }
            let previous = statuses
                .remove(&name)
                .unwrap_or_else(|| ComponentHealth::pending(&name));
            let health = Self::fold(previous, result, threshold, elapsed, checked_at);
            refreshed.push(health.clone());
            statuses.insert(name, health);
        }

        refreshed.sort_by(|a, b| a.component.cmp(&b.component));
        refreshed
    }

    fn fold(
        previous: ComponentHealth,
        result: ProbeResult,
        failure_threshold: u32,
        elapsed: Duration,
        checked_at: DateTime<Utc>,
    ) -> ComponentHealth {
        let mut health = previous;
        health.last_checked = Some(checked_at);
        health.total_checks += 1;
        health.response_time_ms = Some(elapsed.as_millis() as u64);

        match result {
            ProbeResult::Completed(outcome) => {
                if outcome.status == HealthStatus::Critical {
                    health.consecutive_failures += 1;
                } else {
                    health.consecutive_failures = 0;
                }
                if outcome.status != health.status {
                    debug!("{} is now {}: {}", health.component, outcome.status, outcome.message);
                }
                health.status = outcome.status;
                health.message = outcome.message;
                health.metrics = outcome.metrics;
            }
            ProbeResult::Failed(reason) => {
                health.consecutive_failures += 1;
                let failure = MonitorError::ProbeFailure {
                    component: health.component.clone(),
                    reason,
                };
                health.status = if health.consecutive_failures >= failure_threshold {
                    HealthStatus::Critical
                } else {
                    HealthStatus::Degraded
                };
                warn!(
                    "{} ({} consecutive, marked {})",
                    failure, health.consecutive_failures, health.status
                );
                health.message = failure.to_string();
                health.metrics = None;
            }
        }

        health
    }

    pub async fn get_status(&self, component: &str) -> Option<ComponentHealth> {
        self.statuses.read().await.get(component).cloned()
    }

    pub async fn get_all_statuses(&self) -> Vec<ComponentHealth> {
        let mut all: Vec<ComponentHealth> = self.statuses.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.component.cmp(&b.component));
        all
    }

    pub async fn status_map(&self) -> HashMap<String, ComponentHealth> {
        self.statuses.read().await.clone()
    }

    /// Worst status across components; `Unknown` when nothing is registered
    pub async fn overall_status(&self) -> HealthStatus {
        overall_of(self.statuses.read().await.values().map(|h| h.status))
    }
}

pub fn overall_of(statuses: impl Iterator<Item = HealthStatus>) -> HealthStatus {
    statuses
        .reduce(HealthStatus::worst)
        .unwrap_or(HealthStatus::Unknown)
}

/// Compares the sampled resource gauges against the configured thresholds
pub struct ResourceProbe {
    registry: Arc<MetricRegistry>,
    thresholds: ThresholdConfig,
}

impl ResourceProbe {
    pub fn new(registry: Arc<MetricRegistry>, thresholds: ThresholdConfig) -> Self {
        Self { registry, thresholds }
    }
}

#[async_trait]
impl HealthProbe for ResourceProbe {
    async fn check(&self) -> MonitorResult<ProbeOutcome> {
        let t = &self.thresholds;
        let limits = [
            ("cpu_usage", "CPU", t.cpu_warning, t.cpu_critical),
            ("memory_usage", "Memory", t.memory_warning, t.memory_critical),
            ("disk_usage", "Disk", t.disk_warning, t.disk_critical),
        ];

        let mut status = HealthStatus::Healthy;
        let mut notes = Vec::new();
        let mut values = HashMap::new();
        for (metric, label, warning, critical) in limits {
            let Some(value) = self.registry.value(metric) else {
                continue;
            };
            values.insert(metric.to_string(), value);
            if value >= critical {
                status = status.worst(HealthStatus::Critical);
                notes.push(format!("{} at {:.1}%", label, value));
            } else if value >= warning {
                status = status.worst(HealthStatus::Degraded);
                notes.push(format!("{} at {:.1}%", label, value));
            }
        }

        if values.is_empty() {
            return Ok(ProbeOutcome::new(HealthStatus::Unknown, "No resource samples yet"));
        }

        let message = if notes.is_empty() {
            "Resource usage within limits".to_string()
        } else {
            notes.join(", ")
        };
        Ok(ProbeOutcome::new(status, message).with_metrics(values))
    }
}

/// Checks API connectivity with a plain GET
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self) -> MonitorResult<ProbeOutcome> {
        let started = Instant::now();
        let response = self.client.get(&self.url).send().await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let code = response.status();

        let metrics = HashMap::from([("latency_ms".to_string(), latency_ms)]);
        let outcome = if code.is_success() {
            ProbeOutcome::healthy(format!("{} responded {} in {:.0}ms", self.url, code, latency_ms))
        } else if code.is_server_error() {
            ProbeOutcome::critical(format!("{} responded {}", self.url, code))
        } else {
            ProbeOutcome::degraded(format!("{} responded {}", self.url, code))
        };
        Ok(outcome.with_metrics(metrics))
    }
}

/// Writes, reads back and removes a sentinel file
pub struct StorageProbe {
    dir: PathBuf,
}

impl StorageProbe {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl HealthProbe for StorageProbe {
    async fn check(&self) -> MonitorResult<ProbeOutcome> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!(".tradewatch-probe-{}", Uuid::new_v4()));
        let payload = b"ok";

        tokio::fs::write(&path, payload).await?;
        let read_back = tokio::fs::read(&path).await;
        tokio::fs::remove_file(&path).await?;

        if read_back? != payload {
            return Ok(ProbeOutcome::critical(format!(
                "{} returned corrupted data",
                self.dir.display()
            )));
        }
        Ok(ProbeOutcome::healthy(format!("{} is writable", self.dir.display())))
    }
}

/// Adapts an async closure into a probe
pub struct FnProbe<F> {
    check: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = MonitorResult<ProbeOutcome>> + Send + 'static,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = MonitorResult<ProbeOutcome>> + Send + 'static,
{
    async fn check(&self) -> MonitorResult<ProbeOutcome> {
        (self.check)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::monitoring::metrics::{MetricKind, MetricMetadata};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn checker() -> HealthChecker {
        HealthChecker::new(Arc::new(SystemClock), Duration::from_millis(200), 1)
    }

    struct StaticProbe(HealthStatus);

    #[async_trait]
    impl HealthProbe for StaticProbe {
        async fn check(&self) -> MonitorResult<ProbeOutcome> {
            Ok(ProbeOutcome::new(self.0, "static"))
        }
    }

    struct SlowProbe;

    #[async_trait]
    impl HealthProbe for SlowProbe {
        async fn check(&self) -> MonitorResult<ProbeOutcome> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(ProbeOutcome::healthy("slow but fine"))
        }
    }

    #[tokio::test]
    async fn test_removed_component_stays_removed_during_cycle() {
        let health = Arc::new(checker());
        health.register_check("order_router", Arc::new(SlowProbe)).await;

        let cycle = {
            let health = Arc::clone(&health);
            tokio::spawn(async move { health.run_all().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(health.remove_check("order_router").await);

        let results = cycle.await.unwrap();
        assert!(results.is_empty());
        assert!(health.get_all_statuses().await.is_empty());
        assert_eq!(health.overall_status().await, HealthStatus::Unknown);
    }

    struct FailingProbe;

    #[async_trait]
    impl HealthProbe for FailingProbe {
        async fn check(&self) -> MonitorResult<ProbeOutcome> {
            Err(MonitorError::Http("connection refused".to_string()))
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        async fn check(&self) -> MonitorResult<ProbeOutcome> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ProbeOutcome::healthy("late"))
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl HealthProbe for PanickingProbe {
        async fn check(&self) -> MonitorResult<ProbeOutcome> {
            panic!("probe blew up");
        }
    }

    #[test]
    fn test_status_ordering() {
        use HealthStatus::*;
        assert_eq!(Healthy.worst(Unknown), Unknown);
        assert_eq!(Unknown.worst(Degraded), Degraded);
        assert_eq!(Critical.worst(Degraded), Critical);
        assert_eq!(overall_of([Healthy, Degraded, Unknown].into_iter()), Degraded);
        assert_eq!(overall_of(std::iter::empty()), Unknown);
        assert!(Critical.at_least(Degraded));
        assert!(!Unknown.at_least(Degraded));
    }

    #[tokio::test]
    async fn test_registered_component_starts_unknown() {
        let checker = checker();
        checker
            .register_check("storage", Arc::new(StaticProbe(HealthStatus::Healthy)))
            .await;

        let status = checker.get_status("storage").await.unwrap();
        assert_eq!(status.status, HealthStatus::Unknown);
        assert!(status.last_checked.is_none());
        assert_eq!(checker.overall_status().await, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let checker = checker();
        checker.register_check("ok", Arc::new(StaticProbe(HealthStatus::Healthy))).await;
        checker.register_check("broken", Arc::new(FailingProbe)).await;
        checker.register_check("slow", Arc::new(HangingProbe)).await;
        checker.register_check("panics", Arc::new(PanickingProbe)).await;

        let results = checker.run_all().await;
        assert_eq!(results.len(), 4);

        let ok = checker.get_status("ok").await.unwrap();
        assert_eq!(ok.status, HealthStatus::Healthy);

        let broken = checker.get_status("broken").await.unwrap();
        assert_eq!(broken.status, HealthStatus::Critical);
        assert!(broken.message.contains("connection refused"));

        let slow = checker.get_status("slow").await.unwrap();
        assert_eq!(slow.status, HealthStatus::Critical);
        assert!(slow.message.contains("timed out"));

        let panics = checker.get_status("panics").await.unwrap();
        assert_eq!(panics.status, HealthStatus::Critical);
        assert!(panics.message.contains("panicked"));

        assert_eq!(checker.overall_status().await, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn test_failure_threshold_degrades_first() {
        let checker = checker();
        checker
            .register_check_with("api", Arc::new(FailingProbe), Duration::from_millis(100), 2)
            .await;

        checker.run_all().await;
        let first = checker.get_status("api").await.unwrap();
        assert_eq!(first.status, HealthStatus::Degraded);
        assert_eq!(first.consecutive_failures, 1);

        checker.run_all().await;
        let second = checker.get_status("api").await.unwrap();
        assert_eq!(second.status, HealthStatus::Critical);
        assert_eq!(second.consecutive_failures, 2);
        assert_eq!(second.total_checks, 2);
    }

    #[tokio::test]
    async fn test_recovery_resets_failures() {
        let flaky = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&flaky);
        let probe = FnProbe::new(move || {
            let failing = flag.load(Ordering::SeqCst);
            async move {
                if failing {
                    Err(MonitorError::Io("disk gone".to_string()))
                } else {
                    Ok(ProbeOutcome::healthy("back"))
                }
            }
        });

        let checker = checker();
        checker.register_check("disk", Arc::new(probe)).await;

        checker.run_all().await;
        assert_eq!(checker.get_status("disk").await.unwrap().status, HealthStatus::Critical);

        flaky.store(false, Ordering::SeqCst);
        checker.run_all().await;
        let status = checker.get_status("disk").await.unwrap();
        assert_eq!(status.status, HealthStatus::Healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.message, "back");
    }

    #[tokio::test]
    async fn test_resource_probe_uses_thresholds() {
        let registry = Arc::new(MetricRegistry::new());
        for name in ["cpu_usage", "memory_usage"] {
            registry.register(name, MetricKind::Gauge, MetricMetadata::new("system")).unwrap();
        }
        let probe = ResourceProbe::new(Arc::clone(&registry), ThresholdConfig::default());

        let outcome = probe.check().await.unwrap();
        assert_eq!(outcome.status, HealthStatus::Unknown);

        registry.record("cpu_usage", 80.0, None).unwrap();
        registry.record("memory_usage", 40.0, None).unwrap();
        let outcome = probe.check().await.unwrap();
        assert_eq!(outcome.status, HealthStatus::Degraded);
        assert!(outcome.message.contains("CPU"));

        registry.record("memory_usage", 97.0, None).unwrap();
        let outcome = probe.check().await.unwrap();
        assert_eq!(outcome.status, HealthStatus::Critical);
        assert_eq!(outcome.metrics.unwrap().get("memory_usage"), Some(&97.0));
    }

    #[tokio::test]
    async fn test_storage_probe() {
        let dir = tempfile::tempdir().unwrap();
        let probe = StorageProbe::new(dir.path().join("data"));

        let outcome = probe.check().await.unwrap();
        assert_eq!(outcome.status, HealthStatus::Healthy);
        assert_eq!(std::fs::read_dir(dir.path().join("data")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_check() {
        let checker = checker();
        checker.register_check("ok", Arc::new(StaticProbe(HealthStatus::Healthy))).await;
        assert!(checker.remove_check("ok").await);
        assert!(checker.get_status("ok").await.is_none());
        assert!(checker.components().await.is_empty());
    }
}
