//! Monitoring coordinator
//!
//! [`SystemMonitor`] owns the registry, the health checker, the alert engine
//! and the dispatcher, and drives them from three independent loops:
//! resource sampling, health checks and alert evaluation. Deliveries are
//! spawned off the evaluation loop with a bounded retry.

use crate::clock::{SharedClock, SystemClock};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::alerts::{Alert, AlertEngine, CustomAlertRequest, EngineSettings};
use crate::monitoring::channels::build_channel;
use crate::monitoring::health::{ComponentHealth, HealthChecker, HealthStatus, HttpProbe, ResourceProbe, StorageProbe};
use crate::monitoring::metrics::{MetricRegistry, MetricsSnapshot};
use crate::monitoring::notification::{DeliveryReport, NotificationDispatcher, NotificationEvent};
use crate::monitoring::performance::{PerformanceMonitor, ResourceSample, SysinfoSampler, SystemSampler};
use crate::monitoring::rules::{default_rules, EvaluationContext};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub overall_health: HealthStatus,
    pub components: usize,
    pub active_alerts: usize,
    pub alerts_by_severity: BTreeMap<String, usize>,
    pub metrics: MetricsSnapshot,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

pub struct SystemMonitor {
    config: MonitorConfig,
    clock: SharedClock,
    registry: Arc<MetricRegistry>,
    performance: Arc<PerformanceMonitor>,
    health: Arc<HealthChecker>,
    engine: Arc<AlertEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    started: Instant,
    started_at: DateTime<Utc>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SystemMonitor {
    /// Build a monitor on the wall clock and the host's resources
    pub async fn new(config: MonitorConfig) -> MonitorResult<Self> {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(SysinfoSampler::new())).await
    }

    pub async fn with_parts(
        config: MonitorConfig,
        clock: SharedClock,
        sampler: Arc<dyn SystemSampler>,
    ) -> MonitorResult<Self> {
        config
            .validate()
            .map_err(|errors| MonitorError::Configuration(errors.join("; ")))?;

        let registry = Arc::new(MetricRegistry::new());
        let performance = Arc::new(PerformanceMonitor::new(
            Arc::clone(&registry),
            sampler,
            config.metrics.rolling_window,
        )?);

        let health = Arc::new(HealthChecker::from_config(&config.health, Arc::clone(&clock)));
        if config.health.resource_probe {
            health
                .register_check(
                    "resources",
                    Arc::new(ResourceProbe::new(Arc::clone(&registry), config.thresholds.clone())),
                )
                .await;
        }
        if let Some(url) = &config.health.api_endpoint {
            health.register_check("api", Arc::new(HttpProbe::new(url))).await;
        }
        if let Some(path) = &config.health.storage_path {
            health
                .register_check("storage", Arc::new(StorageProbe::new(path.clone())))
                .await;
        }

        let engine = Arc::new(AlertEngine::new(
            Arc::clone(&clock),
            EngineSettings::from(&config.alerts),
        ));
        if config.alerts.install_default_rules {
            for rule in default_rules(&config.thresholds, &config.alerts) {
                engine.register_rule(rule).await?;
            }
        }
        for rule in &config.rules {
            engine.register_rule(rule.clone()).await?;
        }

        let dispatcher = Arc::new(NotificationDispatcher::new());
        for channel in &config.channels {
            dispatcher.register_channel(build_channel(channel)?).await;
        }

        let (shutdown_tx, _) = broadcast::channel(4);
        let started = clock.now();
        let started_at = clock.wall();

        Ok(Self {
            config,
            clock,
            registry,
            performance,
            health,
            engine,
            dispatcher,
            started,
            started_at,
            running: AtomicBool::new(false),
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Spawn the periodic loops. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Monitoring already running");
            return;
        }

        let intervals = &self.config.intervals;
        let handles = vec![
            self.spawn_loop("metrics", intervals.metrics_collection(), |monitor| async move {
                if let Err(e) = monitor.sample_now().await {
                    warn!("Resource sampling failed: {}", e);
                }
            }),
            self.spawn_loop("health", intervals.health_check(), |monitor| async move {
                monitor.force_health_check().await;
            }),
            self.spawn_loop("alerts", intervals.alert_evaluation(), |monitor| async move {
                monitor.evaluate_now().await;
            }),
        ];
        self.tasks.lock().extend(handles);

        info!(
            "🚀 Monitoring started (metrics every {:?}, health every {:?}, alerts every {:?})",
            intervals.metrics_collection(),
            intervals.health_check(),
            intervals.alert_evaluation()
        );
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(Arc<SystemMonitor>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let monitor = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(Arc::clone(&monitor)).await,
                    _ = shutdown.recv() => break,
                }
            }
            debug!("{} loop stopped", name);
        })
    }

    /// Signal every loop to stop and wait for them to finish
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Monitoring loop ended abnormally: {}", e);
            }
        }
        info!("🛑 Monitoring stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn sample_now(&self) -> MonitorResult<ResourceSample> {
        self.performance.sample().await
    }

    pub async fn force_health_check(&self) -> Vec<ComponentHealth> {
        let results = self.health.run_all().await;
        for component in results.iter().filter(|c| c.status != HealthStatus::Healthy) {
            debug!("{} is {}: {}", component.component, component.status, component.message);
        }
        results
    }

    /// Latest metrics snapshot and cached health, as one tick sees them
    pub async fn evaluation_context(&self) -> EvaluationContext {
        EvaluationContext::new(self.registry.snapshot(), self.health.status_map().await)
    }

    /// Evaluate every rule against the current snapshot and spawn the resulting deliveries
    pub async fn evaluate_now(&self) -> Vec<NotificationEvent> {
        let ctx = self.evaluation_context().await;
        let events = self.engine.evaluate(&ctx).await;
        for event in &events {
            self.spawn_delivery(event.clone());
        }
        events
    }

    fn spawn_delivery(&self, event: NotificationEvent) -> JoinHandle<Vec<DeliveryReport>> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let retries = self.config.alerts.notification_retries;
        let delay = self.config.alerts.retry_delay();
        tokio::spawn(async move { deliver_with_retry(&dispatcher, &event, retries, delay).await })
    }

    pub async fn create_custom_alert(&self, request: CustomAlertRequest) -> MonitorResult<Alert> {
        let (alert, event) = self.engine.create_custom_alert(request).await?;
        if let Some(event) = event {
            self.spawn_delivery(event);
        }
        Ok(alert)
    }

    pub async fn acknowledge_alert(&self, id: Uuid, actor: &str) -> MonitorResult<Alert> {
        self.engine.acknowledge(id, actor).await
    }

    pub async fn resolve_alert(&self, id: Uuid) -> MonitorResult<Alert> {
        self.resolve_alert_by(id, None).await
    }

    pub async fn resolve_alert_by(&self, id: Uuid, actor: Option<&str>) -> MonitorResult<Alert> {
        let resolution = self.engine.resolve_by(id, actor).await?;
        if let Some(event) = resolution.event {
            self.spawn_delivery(event);
        }
        Ok(resolution.alert)
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let statuses = self.health.get_all_statuses().await;
        let overall_health =
            crate::monitoring::health::overall_of(statuses.iter().map(|c| c.status));
        let (active, counts) = self.engine.active_summary().await;
        let active_alerts = active.len();
        let alerts_by_severity = counts
            .into_iter()
            .map(|(severity, count)| (severity.to_string(), count))
            .collect();

        SystemStatus {
            overall_health,
            components: statuses.len(),
            active_alerts,
            alerts_by_severity,
            metrics: self.registry.snapshot(),
            uptime_secs: self.clock.now().duration_since(self.started).as_secs(),
            started_at: self.started_at,
            running: self.is_running(),
        }
    }

    pub async fn get_health(&self) -> Vec<ComponentHealth> {
        self.health.get_all_statuses().await
    }

    pub fn get_performance(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }

    pub async fn get_active_alerts(&self) -> Vec<Alert> {
        self.engine.active_alerts().await
    }

    pub async fn alert_history(&self, limit: Option<usize>) -> Vec<Alert> {
        self.engine.history(limit).await
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn performance(&self) -> &Arc<PerformanceMonitor> {
        &self.performance
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }
}

/// Dispatch `event`, re-sending to failed channels up to `retries` times
pub async fn deliver_with_retry(
    dispatcher: &NotificationDispatcher,
    event: &NotificationEvent,
    retries: u32,
    delay: Duration,
) -> Vec<DeliveryReport> {
    let mut reports = dispatcher.dispatch_event(event).await;
    for attempt in 1..=retries {
        let failed: Vec<String> = reports
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.channel.clone())
            .collect();
        if failed.is_empty() {
            break;
        }
        tokio::time::sleep(delay).await;
        debug!("Retrying {} for alert {} on {:?} (attempt {})", event.kind, event.alert_id, failed, attempt);
        for report in dispatcher.dispatch(event, &failed).await {
            if let Some(slot) = reports.iter_mut().find(|r| r.channel == report.channel) {
                *slot = report;
            }
        }
    }
    reports
}
