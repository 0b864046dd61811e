//! Alert state machine
//!
//! The engine keeps at most one open [`Alert`] per (rule, scope). Each
//! evaluation tick walks every enabled rule over its scopes against a single
//! [`EvaluationContext`] and returns the notification events the tick
//! produced; it never sends anything itself.
//!
//! Cooldown and escalation are measured on the injected [`Clock`], so tests
//! move time forward instead of sleeping.
//!
//! [`Clock`]: crate::clock::Clock

use crate::clock::SharedClock;
use crate::config::AlertConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::notification::{EventKind, NotificationEvent};
use crate::monitoring::rules::{
    AlertRule, AlertSeverity, CustomPredicate, EvaluationContext, PredicateRegistry, Verdict,
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Alert lifecycle; only moves forward and `Resolved` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Active,
    Acknowledged,
    Escalated,
    Resolved,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Active => write!(f, "ACTIVE"),
            AlertState::Acknowledged => write!(f, "ACKNOWLEDGED"),
            AlertState::Escalated => write!(f, "ESCALATED"),
            AlertState::Resolved => write!(f, "RESOLVED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule: String,
    pub scope: String,
    pub severity: AlertSeverity,
    pub category: String,
    pub title: String,
    pub message: String,
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    pub last_fired_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub metric_values: HashMap<String, f64>,
}

impl Alert {
    pub fn new(
        rule: &str,
        scope: &str,
        severity: AlertSeverity,
        category: &str,
        title: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule: rule.to_string(),
            scope: scope.to_string(),
            severity,
            category: category.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            state: AlertState::Active,
            created_at: at,
            last_fired_at: at,
            acknowledged_by: None,
            acknowledged_at: None,
            escalated_at: None,
            resolved_at: None,
            fire_count: 1,
            metric_values: HashMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state != AlertState::Resolved
    }
}

/// Operator-initiated alert that does not come from a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAlertRequest {
    pub title: String,
    pub message: String,
    #[serde(default = "default_custom_severity")]
    pub severity: AlertSeverity,
    #[serde(default = "default_custom_category")]
    pub category: String,
    /// Dedup key; defaults to the title
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub escalation_secs: Option<u64>,
}

fn default_custom_severity() -> AlertSeverity {
    AlertSeverity::Warning
}

fn default_custom_category() -> String {
    "custom".to_string()
}

pub const CUSTOM_RULE: &str = "custom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub alert_id: Uuid,
    pub action: String,
    pub actor: Option<String>,
    pub detail: String,
}

/// Outcome of a resolve command; `event` is `None` when the alert was already resolved
#[derive(Debug, Clone)]
pub struct Resolution {
    pub alert: Alert,
    pub event: Option<NotificationEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct AlertKey {
    rule: String,
    scope: String,
}

impl AlertKey {
    fn new(rule: &str, scope: &str) -> Self {
        Self {
            rule: rule.to_string(),
            scope: scope.to_string(),
        }
    }
}

struct ActiveRecord {
    alert: Alert,
    opened: Instant,
    last_fired: Instant,
    escalation: Option<Duration>,
    channels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_channels: Vec<String>,
    pub escalation_channels: Vec<String>,
    pub default_cooldown: Duration,
    pub history_limit: usize,
    pub audit_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&AlertConfig::default())
    }
}

impl From<&AlertConfig> for EngineSettings {
    fn from(config: &AlertConfig) -> Self {
        Self {
            default_channels: config.default_channels.clone(),
            escalation_channels: config.escalation_channels.clone(),
            default_cooldown: config.default_cooldown(),
            history_limit: config.history_limit.max(1),
            audit_limit: config.audit_limit.max(1),
        }
    }
}

#[derive(Default)]
struct EngineState {
    rules: BTreeMap<String, AlertRule>,
    active: HashMap<AlertKey, ActiveRecord>,
    by_id: HashMap<Uuid, AlertKey>,
    history: VecDeque<Alert>,
    // survives resolution so a flapping condition still honours cooldown
    last_fire: HashMap<AlertKey, Instant>,
    audit: VecDeque<AuditEntry>,
}

pub struct AlertEngine {
    state: Mutex<EngineState>,
    predicates: RwLock<PredicateRegistry>,
    settings: EngineSettings,
    clock: SharedClock,
}

impl AlertEngine {
    pub fn new(clock: SharedClock, settings: EngineSettings) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            predicates: RwLock::new(PredicateRegistry::new()),
            settings,
            clock,
        }
    }

    /// Register a rule, replacing any rule with the same name
    pub async fn register_rule(&self, rule: AlertRule) -> MonitorResult<()> {
        rule.validate()?;
        let mut state = self.state.lock().await;
        if state.rules.insert(rule.name.clone(), rule.clone()).is_some() {
            info!("Replaced alert rule: {}", rule.name);
        } else {
            info!("Added alert rule: {} ({})", rule.name, rule.severity);
        }
        Ok(())
    }

    /// Open alerts raised by the rule stay open until resolved
    pub async fn remove_rule(&self, name: &str) -> bool {
        self.state.lock().await.rules.remove(name).is_some()
    }

    pub async fn rules(&self) -> Vec<AlertRule> {
        self.state.lock().await.rules.values().cloned().collect()
    }

    pub fn register_predicate(&self, name: &str, predicate: CustomPredicate) {
        self.predicates.write().insert(name.to_string(), predicate);
        debug!("Registered custom predicate: {}", name);
    }

    fn channels_for(&self, rule_channels: &[String]) -> Vec<String> {
        if rule_channels.is_empty() {
            self.settings.default_channels.clone()
        } else {
            rule_channels.to_vec()
        }
    }

    fn escalation_targets(&self, channels: &[String]) -> Vec<String> {
        let mut targets = channels.to_vec();
        for extra in &self.settings.escalation_channels {
            if !targets.contains(extra) {
                targets.push(extra.clone());
            }
        }
        targets
    }

    /// Resolution follows whichever route the alert was last announced on
    fn resolution_targets(&self, alert: &Alert, channels: &[String]) -> Vec<String> {
        if alert.escalated_at.is_some() {
            self.escalation_targets(channels)
        } else {
            channels.to_vec()
        }
    }

    /// Run one evaluation tick against `ctx` and return the events it produced
    pub async fn evaluate(&self, ctx: &EvaluationContext) -> Vec<NotificationEvent> {
        let predicates = self.predicates.read().clone();
        let now = self.clock.now();
        let wall = self.clock.wall();
        let mut events = Vec::new();

        let mut state = self.state.lock().await;
        let rules: Vec<AlertRule> = state.rules.values().filter(|r| r.enabled).cloned().collect();

        for rule in &rules {
            for scope in rule.scope.resolve(ctx) {
                let key = AlertKey::new(&rule.name, &scope);
                let verdict = match rule.condition.evaluate(ctx, &scope, &predicates) {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        let failure = MonitorError::RuleEvaluation {
                            rule: format!("{}/{}", rule.name, scope),
                            reason: e.to_string(),
                        };
                        error!("{}", failure);
                        continue;
                    }
                };

                match verdict {
                    Verdict::Fire { severity } => {
                        let severity = severity.unwrap_or(rule.severity);
                        if let Some(event) = self.on_fire(&mut state, rule, &key, severity, ctx, now, wall) {
                            events.push(event);
                        }
                    }
                    Verdict::Clear => {
                        if rule.auto_resolve && state.active.contains_key(&key) {
                            if let Some((alert, channels)) =
                                Self::close(&mut state, &key, wall, None, "condition cleared", self.settings.history_limit, self.settings.audit_limit)
                            {
                                let channels = self.resolution_targets(&alert, &channels);
                                events.push(NotificationEvent::new(EventKind::Resolved, &alert, channels, wall));
                            }
                        }
                    }
                }
            }
        }

        events.extend(self.escalate_due(&mut state, now, wall));
        events
    }

    #[allow(clippy::too_many_arguments)]
    fn on_fire(
        &self,
        state: &mut EngineState,
        rule: &AlertRule,
        key: &AlertKey,
        severity: AlertSeverity,
        ctx: &EvaluationContext,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Option<NotificationEvent> {
        let cooldown = rule.cooldown();
        let message = rule.render_message(ctx, &key.scope);
        let readings: HashMap<String, f64> = rule
            .condition
            .referenced_metrics(&key.scope)
            .into_iter()
            .filter_map(|name| ctx.metric(&name).map(|v| (name, v)))
            .collect();
        let channels = self.channels_for(&rule.channels);

        if let Some(record) = state.active.get_mut(key) {
            record.alert.fire_count += 1;
            record.alert.severity = record.alert.severity.max(severity);
            record.alert.message = message;
            record.alert.metric_values = readings;
            record.escalation = rule.escalation();
            record.channels = channels.clone();

            if now.duration_since(record.last_fired) < cooldown {
                debug!(
                    "{}/{} still firing within cooldown (count {})",
                    key.rule, key.scope, record.alert.fire_count
                );
                return None;
            }

            record.last_fired = now;
            record.alert.last_fired_at = wall;
            let event = NotificationEvent::new(EventKind::Fired, &record.alert, channels, wall);
            state.last_fire.insert(key.clone(), now);
            return Some(event);
        }

        if let Some(last) = state.last_fire.get(key) {
            if now.duration_since(*last) < cooldown {
                debug!("{}/{} suppressed by cooldown", key.rule, key.scope);
                return None;
            }
        }

        let mut alert = Alert::new(
            &rule.name,
            &key.scope,
            severity,
            &rule.category,
            &rule.render_title(&key.scope),
            &message,
            wall,
        );
        alert.metric_values = readings;
        warn!("Alert fired: [{}] {} ({})", alert.severity, alert.title, alert.id);

        let event = NotificationEvent::new(EventKind::Fired, &alert, channels.clone(), wall);
        Self::push_audit(state, self.settings.audit_limit, wall, &alert, "fired", None, &alert.message);
        state.by_id.insert(alert.id, key.clone());
        state.last_fire.insert(key.clone(), now);
        state.active.insert(
            key.clone(),
            ActiveRecord {
                alert,
                opened: now,
                last_fired: now,
                escalation: rule.escalation(),
                channels,
            },
        );
        Some(event)
    }

    fn escalate_due(&self, state: &mut EngineState, now: Instant, wall: DateTime<Utc>) -> Vec<NotificationEvent> {
        let mut due: Vec<AlertKey> = state
            .active
            .iter()
            .filter(|(_, record)| {
                record.alert.state != AlertState::Escalated
                    && record
                        .escalation
                        .is_some_and(|after| now.duration_since(record.opened) > after)
            })
            .map(|(key, _)| key.clone())
            .collect();
        due.sort();

        let mut events = Vec::with_capacity(due.len());
        for key in due {
            let Some(record) = state.active.get_mut(&key) else {
                continue;
            };
            record.alert.state = AlertState::Escalated;
            record.alert.escalated_at = Some(wall);
            record.alert.severity = record.alert.severity.escalated();
            let alert = record.alert.clone();
            let channels = self.escalation_targets(&record.channels);

            warn!("Alert escalated: [{}] {} ({})", alert.severity, alert.title, alert.id);
            Self::push_audit(state, self.settings.audit_limit, wall, &alert, "escalated", None, "unresolved past escalation delay");
            events.push(NotificationEvent::new(EventKind::Escalated, &alert, channels, wall));
        }
        events
    }

    fn close(
        state: &mut EngineState,
        key: &AlertKey,
        wall: DateTime<Utc>,
        actor: Option<&str>,
        reason: &str,
        history_limit: usize,
        audit_limit: usize,
    ) -> Option<(Alert, Vec<String>)> {
        let record = state.active.remove(key)?;
        state.by_id.remove(&record.alert.id);

        let mut alert = record.alert;
        alert.state = AlertState::Resolved;
        alert.resolved_at = Some(wall);
        info!("Alert resolved: {} ({}): {}", alert.title, alert.id, reason);

        Self::push_audit(state, audit_limit, wall, &alert, "resolved", actor, reason);
        state.history.push_back(alert.clone());
        while state.history.len() > history_limit {
            state.history.pop_front();
        }
        Some((alert, record.channels))
    }

    #[allow(clippy::too_many_arguments)]
    fn push_audit(
        state: &mut EngineState,
        limit: usize,
        at: DateTime<Utc>,
        alert: &Alert,
        action: &str,
        actor: Option<&str>,
        detail: &str,
    ) {
        state.audit.push_back(AuditEntry {
            at,
            alert_id: alert.id,
            action: action.to_string(),
            actor: actor.map(str::to_string),
            detail: detail.to_string(),
        });
        while state.audit.len() > limit {
            state.audit.pop_front();
        }
    }

    /// Mark an open alert as acknowledged by `actor`.
    ///
    /// An escalated alert keeps its state and records the actor. Nothing is
    /// dispatched; the transition only lands in the audit log.
    pub async fn acknowledge(&self, id: Uuid, actor: &str) -> MonitorResult<Alert> {
        let wall = self.clock.wall();
        let mut state = self.state.lock().await;

        let Some(key) = state.by_id.get(&id).cloned() else {
            return Err(Self::missing_or_resolved(&state, id, "acknowledge"));
        };
        let record = state
            .active
            .get_mut(&key)
            .ok_or_else(|| MonitorError::NotFound(format!("alert {}", id)))?;

        if record.alert.acknowledged_by.is_none() {
            record.alert.acknowledged_by = Some(actor.to_string());
            record.alert.acknowledged_at = Some(wall);
        }
        if record.alert.state == AlertState::Active {
            record.alert.state = AlertState::Acknowledged;
        }
        let alert = record.alert.clone();

        let audit_limit = self.settings.audit_limit;
        Self::push_audit(&mut state, audit_limit, wall, &alert, "acknowledged", Some(actor), "");
        info!(
            "{}",
            NotificationEvent::new(EventKind::Acknowledged, &alert, Vec::new(), wall).payload
        );
        Ok(alert)
    }

    /// Resolve an alert. Resolving an already-resolved alert succeeds without side effects.
    ///
    /// Resolved alerts are remembered only while they sit in the bounded
    /// history (`history_limit`); once evicted, the id resolves to `NotFound`.
    pub async fn resolve(&self, id: Uuid) -> MonitorResult<Resolution> {
        self.resolve_by(id, None).await
    }

    pub async fn resolve_by(&self, id: Uuid, actor: Option<&str>) -> MonitorResult<Resolution> {
        let wall = self.clock.wall();
        let mut state = self.state.lock().await;

        let Some(key) = state.by_id.get(&id).cloned() else {
            return match state.history.iter().rev().find(|a| a.id == id) {
                Some(alert) => Ok(Resolution {
                    alert: alert.clone(),
                    event: None,
                }),
                None => Err(MonitorError::NotFound(format!("alert {}", id))),
            };
        };

        let (alert, channels) = Self::close(
            &mut state,
            &key,
            wall,
            actor,
            "resolved by operator",
            self.settings.history_limit,
            self.settings.audit_limit,
        )
        .ok_or_else(|| MonitorError::NotFound(format!("alert {}", id)))?;

        let channels = self.resolution_targets(&alert, &channels);
        let event = NotificationEvent::new(EventKind::Resolved, &alert, channels, wall);
        Ok(Resolution {
            alert,
            event: Some(event),
        })
    }

    fn missing_or_resolved(state: &EngineState, id: Uuid, action: &str) -> MonitorError {
        if state.history.iter().any(|a| a.id == id) {
            MonitorError::InvalidTransition {
                alert_id: id.to_string(),
                state: AlertState::Resolved.to_string(),
                action: action.to_string(),
            }
        } else {
            MonitorError::NotFound(format!("alert {}", id))
        }
    }

    /// Raise an alert outside the rule set. Deduplicated on (custom, scope) like rule alerts.
    pub async fn create_custom_alert(
        &self,
        request: CustomAlertRequest,
    ) -> MonitorResult<(Alert, Option<NotificationEvent>)> {
        if request.title.trim().is_empty() {
            return Err(MonitorError::Configuration("Alert title cannot be empty".to_string()));
        }

        let now = self.clock.now();
        let wall = self.clock.wall();
        let scope = request.scope.clone().unwrap_or_else(|| request.title.clone());
        let key = AlertKey::new(CUSTOM_RULE, &scope);
        let channels = self.channels_for(&request.channels);

        let mut state = self.state.lock().await;
        if let Some(record) = state.active.get_mut(&key) {
            record.alert.fire_count += 1;
            record.alert.severity = record.alert.severity.max(request.severity);
            record.alert.message = request.message;
            return Ok((record.alert.clone(), None));
        }

        let alert = Alert::new(
            CUSTOM_RULE,
            &scope,
            request.severity,
            &request.category,
            &request.title,
            &request.message,
            wall,
        );
        info!("Custom alert created: [{}] {} ({})", alert.severity, alert.title, alert.id);

        let event = NotificationEvent::new(EventKind::Fired, &alert, channels.clone(), wall);
        Self::push_audit(&mut state, self.settings.audit_limit, wall, &alert, "created", None, &alert.message);
        state.by_id.insert(alert.id, key.clone());
        state.last_fire.insert(key.clone(), now);
        state.active.insert(
            key,
            ActiveRecord {
                alert: alert.clone(),
                opened: now,
                last_fired: now,
                escalation: request.escalation_secs.map(Duration::from_secs),
                channels,
            },
        );
        Ok((alert, Some(event)))
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        Self::sorted_active(&*self.state.lock().await)
    }

    /// Open alerts and their per-severity counts, read under one lock
    pub async fn active_summary(&self) -> (Vec<Alert>, BTreeMap<AlertSeverity, usize>) {
        let state = self.state.lock().await;
        (Self::sorted_active(&state), Self::severity_counts(&state))
    }

    fn sorted_active(state: &EngineState) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = state.active.values().map(|r| r.alert.clone()).collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.rule.cmp(&b.rule)));
        alerts
    }

    pub async fn get_alert(&self, id: Uuid) -> Option<Alert> {
        let state = self.state.lock().await;
        if let Some(key) = state.by_id.get(&id) {
            return state.active.get(key).map(|r| r.alert.clone());
        }
        state.history.iter().rev().find(|a| a.id == id).cloned()
    }

    /// Resolved alerts, newest first
    pub async fn history(&self, limit: Option<usize>) -> Vec<Alert> {
        let state = self.state.lock().await;
        let take = limit.unwrap_or(state.history.len());
        state.history.iter().rev().take(take).cloned().collect()
    }

    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.iter().cloned().collect()
    }

    /// Open alerts per severity; every severity is present
    pub async fn counts_by_severity(&self) -> BTreeMap<AlertSeverity, usize> {
        Self::severity_counts(&*self.state.lock().await)
    }

    fn severity_counts(state: &EngineState) -> BTreeMap<AlertSeverity, usize> {
        let mut counts: BTreeMap<AlertSeverity, usize> =
            AlertSeverity::all().into_iter().map(|s| (s, 0)).collect();
        for record in state.active.values() {
            *counts.entry(record.alert.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn default_cooldown(&self) -> Duration {
        self.settings.default_cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::monitoring::health::{ComponentHealth, HealthStatus};
    use crate::monitoring::metrics::{MetricKind, MetricMetadata, MetricRegistry};
    use crate::monitoring::rules::{ComparisonOperator, Condition, RuleScope};
    use std::sync::Arc;

    fn engine() -> (AlertEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (AlertEngine::new(clock.clone(), EngineSettings::default()), clock)
    }

    fn cpu_context(value: f64) -> EvaluationContext {
        let registry = MetricRegistry::new();
        registry.register("cpu_usage", MetricKind::Gauge, MetricMetadata::new("system")).unwrap();
        registry.record("cpu_usage", value, None).unwrap();
        EvaluationContext::new(registry.snapshot(), HashMap::new())
    }

    fn cpu_rule() -> AlertRule {
        AlertRule::new("high_cpu_usage", "High CPU Usage", Condition::bands("cpu_usage", 75.0, 90.0))
            .with_cooldown(Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_fire_then_dedup_within_cooldown() {
        let (engine, clock) = engine();
        engine.register_rule(cpu_rule()).await.unwrap();

        let events = engine.evaluate(&cpu_context(95.0)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Fired);
        assert_eq!(events[0].channels, vec!["log"]);

        clock.advance(Duration::from_secs(60));
        let events = engine.evaluate(&cpu_context(96.0)).await;
        assert!(events.is_empty());

        let active = engine.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
        assert_eq!(active[0].fire_count, 2);
        assert!(active[0].title.contains("CPU"));
        assert_eq!(active[0].metric_values.get("cpu_usage"), Some(&96.0));
    }

    #[tokio::test]
    async fn test_refires_after_cooldown_on_same_alert() {
        let (engine, clock) = engine();
        engine.register_rule(cpu_rule()).await.unwrap();

        engine.evaluate(&cpu_context(95.0)).await;
        let first = engine.active_alerts().await[0].clone();

        clock.advance(Duration::from_secs(301));
        let events = engine.evaluate(&cpu_context(95.0)).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Fired);
        assert_eq!(events[0].alert_id, first.id);
        let alert = engine.get_alert(first.id).await.unwrap();
        assert!(alert.last_fired_at > first.last_fired_at);
    }

    #[tokio::test]
    async fn test_severity_grades_up_while_open() {
        let (engine, _clock) = engine();
        engine.register_rule(cpu_rule()).await.unwrap();

        engine.evaluate(&cpu_context(80.0)).await;
        assert_eq!(engine.active_alerts().await[0].severity, AlertSeverity::Warning);

        engine.evaluate(&cpu_context(92.0)).await;
        assert_eq!(engine.active_alerts().await[0].severity, AlertSeverity::Critical);

        engine.evaluate(&cpu_context(80.0)).await;
        assert_eq!(engine.active_alerts().await[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_auto_resolve_and_cooldown_after_resolve() {
        let (engine, clock) = engine();
        engine.register_rule(cpu_rule()).await.unwrap();

        engine.evaluate(&cpu_context(95.0)).await;
        let events = engine.evaluate(&cpu_context(10.0)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Resolved);
        assert!(engine.active_alerts().await.is_empty());

        // flapping back inside the cooldown window does not reopen
        clock.advance(Duration::from_secs(30));
        assert!(engine.evaluate(&cpu_context(95.0)).await.is_empty());
        assert!(engine.active_alerts().await.is_empty());

        clock.advance(Duration::from_secs(300));
        let events = engine.evaluate(&cpu_context(95.0)).await;
        assert_eq!(events.len(), 1);
        let reopened = engine.active_alerts().await[0].clone();
        assert_ne!(reopened.id, engine.history(None).await[0].id);
    }

    #[tokio::test]
    async fn test_manual_resolve_rule_stays_open() {
        let (engine, _clock) = engine();
        engine.register_rule(cpu_rule().manual_resolve()).await.unwrap();

        engine.evaluate(&cpu_context(95.0)).await;
        assert!(engine.evaluate(&cpu_context(10.0)).await.is_empty());
        assert_eq!(engine.active_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_escalates_exactly_once() {
        let (engine, clock) = engine();
        engine
            .register_rule(cpu_rule().with_escalation(Duration::from_secs(600)))
            .await
            .unwrap();

        engine.evaluate(&cpu_context(95.0)).await;
        clock.advance(Duration::from_secs(599));
        let events = engine.evaluate(&cpu_context(95.0)).await;
        assert!(events.iter().all(|e| e.kind != EventKind::Escalated));

        clock.advance(Duration::from_secs(2));
        let events = engine.evaluate(&cpu_context(95.0)).await;
        let escalated: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Escalated).collect();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].alert.severity, AlertSeverity::Emergency);

        for _ in 0..3 {
            clock.advance(Duration::from_secs(120));
            let events = engine.evaluate(&cpu_context(95.0)).await;
            assert!(events.iter().all(|e| e.kind != EventKind::Escalated));
        }
        assert_eq!(engine.active_alerts().await[0].state, AlertState::Escalated);
    }

    #[tokio::test]
    async fn test_acknowledge_then_resolve() {
        let (engine, _clock) = engine();
        engine.register_rule(cpu_rule().manual_resolve()).await.unwrap();
        engine.evaluate(&cpu_context(95.0)).await;
        let id = engine.active_alerts().await[0].id;

        let acked = engine.acknowledge(id, "opA").await.unwrap();
        assert_eq!(acked.state, AlertState::Acknowledged);

        let resolution = engine.resolve(id).await.unwrap();
        assert_eq!(resolution.alert.state, AlertState::Resolved);
        assert_eq!(resolution.alert.acknowledged_by.as_deref(), Some("opA"));
        assert!(resolution.alert.resolved_at.is_some());
        assert_eq!(resolution.event.unwrap().kind, EventKind::Resolved);

        let err = engine.acknowledge(id, "opB").await.unwrap_err();
        assert!(matches!(err, MonitorError::InvalidTransition { .. }));

        let actions: Vec<String> = engine.audit_log().await.into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["fired", "acknowledged", "resolved"]);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let (engine, _clock) = engine();
        engine.register_rule(cpu_rule()).await.unwrap();
        engine.evaluate(&cpu_context(95.0)).await;
        let id = engine.active_alerts().await[0].id;

        assert!(engine.resolve(id).await.unwrap().event.is_some());
        let again = engine.resolve(id).await.unwrap();
        assert!(again.event.is_none());
        assert_eq!(again.alert.state, AlertState::Resolved);
        assert_eq!(engine.history(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_reaches_escalation_channels() {
        let clock = Arc::new(ManualClock::new());
        let settings = EngineSettings {
            escalation_channels: vec!["pager".to_string()],
            ..EngineSettings::default()
        };
        let engine = AlertEngine::new(clock.clone(), settings);
        engine
            .register_rule(cpu_rule().with_escalation(Duration::from_secs(60)))
            .await
            .unwrap();

        // auto-resolve after escalation
        engine.evaluate(&cpu_context(95.0)).await;
        clock.advance(Duration::from_secs(61));
        engine.evaluate(&cpu_context(95.0)).await;
        let events = engine.evaluate(&cpu_context(10.0)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Resolved);
        assert_eq!(events[0].channels, vec!["log", "pager"]);

        // manual resolve after escalation
        clock.advance(Duration::from_secs(600));
        engine.evaluate(&cpu_context(95.0)).await;
        clock.advance(Duration::from_secs(61));
        engine.evaluate(&cpu_context(95.0)).await;
        let id = engine.active_alerts().await[0].id;
        let event = engine.resolve(id).await.unwrap().event.unwrap();
        assert_eq!(event.channels, vec!["log", "pager"]);
    }

    #[tokio::test]
    async fn test_unescalated_resolution_keeps_rule_channels() {
        let clock = Arc::new(ManualClock::new());
        let settings = EngineSettings {
            escalation_channels: vec!["pager".to_string()],
            ..EngineSettings::default()
        };
        let engine = AlertEngine::new(clock, settings);
        engine.register_rule(cpu_rule()).await.unwrap();

        engine.evaluate(&cpu_context(95.0)).await;
        let id = engine.active_alerts().await[0].id;
        let event = engine.resolve(id).await.unwrap().event.unwrap();
        assert_eq!(event.channels, vec!["log"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acknowledge_and_resolve_settle_resolved() {
        let engine = Arc::new(AlertEngine::new(Arc::new(ManualClock::new()), EngineSettings::default()));

        for i in 0..100 {
            let (alert, _) = engine
                .create_custom_alert(CustomAlertRequest {
                    title: "Order gateway stalled".to_string(),
                    message: "no acks from gateway".to_string(),
                    severity: AlertSeverity::Warning,
                    category: "trading".to_string(),
                    scope: Some(format!("gateway-{}", i)),
                    channels: vec![],
                    escalation_secs: None,
                })
                .await
                .unwrap();
            let id = alert.id;

            let acker = {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.acknowledge(id, "opA").await })
            };
            let resolver = {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.resolve(id).await })
            };
            let acked = acker.await.unwrap();
            let resolution = resolver.await.unwrap().unwrap();

            assert_eq!(resolution.alert.state, AlertState::Resolved);
            assert!(resolution.event.is_some());
            match acked {
                // acknowledged first: the resolve carries the actor
                Ok(alert) => {
                    assert_eq!(alert.state, AlertState::Acknowledged);
                    assert_eq!(resolution.alert.acknowledged_by.as_deref(), Some("opA"));
                }
                // resolved first
                Err(e) => {
                    assert!(matches!(e, MonitorError::InvalidTransition { .. }));
                    assert!(resolution.alert.acknowledged_by.is_none());
                }
            }
            assert_eq!(engine.get_alert(id).await.unwrap().state, AlertState::Resolved);
        }

        assert!(engine.active_alerts().await.is_empty());
        assert_eq!(engine.history(None).await.len(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_active_summary_is_consistent_under_evaluation() {
        let (engine, clock) = engine();
        let engine = Arc::new(engine);
        engine
            .register_rule(cpu_rule().with_cooldown(Duration::from_secs(0)))
            .await
            .unwrap();

        let evaluator = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for i in 0..200 {
                    let value = if i % 2 == 0 { 95.0 } else { 10.0 };
                    engine.evaluate(&cpu_context(value)).await;
                    clock.advance(Duration::from_secs(1));
                }
            })
        };

        for _ in 0..200 {
            let (active, counts) = engine.active_summary().await;
            assert_eq!(active.len(), counts.values().sum::<usize>());
            tokio::task::yield_now().await;
        }
        evaluator.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_forgets_alerts_evicted_from_history() {
        let settings = EngineSettings {
            history_limit: 1,
            ..EngineSettings::default()
        };
        let engine = AlertEngine::new(Arc::new(ManualClock::new()), settings);

        let mut ids = Vec::new();
        for venue in ["xnas", "xlon"] {
            let (alert, _) = engine
                .create_custom_alert(CustomAlertRequest {
                    title: format!("Venue {} halted", venue),
                    message: "trading halted".to_string(),
                    severity: AlertSeverity::Warning,
                    category: "venue".to_string(),
                    scope: None,
                    channels: vec![],
                    escalation_secs: None,
                })
                .await
                .unwrap();
            engine.resolve(alert.id).await.unwrap();
            ids.push(alert.id);
        }

        assert!(engine.resolve(ids[1]).await.unwrap().event.is_none());
        assert!(matches!(engine.resolve(ids[0]).await, Err(MonitorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_alert() {
        let (engine, _clock) = engine();
        assert!(matches!(
            engine.acknowledge(Uuid::new_v4(), "opA").await,
            Err(MonitorError::NotFound(_))
        ));
        assert!(matches!(engine.resolve(Uuid::new_v4()).await, Err(MonitorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_acknowledging_escalated_alert_keeps_state() {
        let (engine, clock) = engine();
        engine
            .register_rule(cpu_rule().with_escalation(Duration::from_secs(60)))
            .await
            .unwrap();
        engine.evaluate(&cpu_context(95.0)).await;
        clock.advance(Duration::from_secs(61));
        engine.evaluate(&cpu_context(95.0)).await;
        let id = engine.active_alerts().await[0].id;

        let alert = engine.acknowledge(id, "opA").await.unwrap();
        assert_eq!(alert.state, AlertState::Escalated);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("opA"));
    }

    #[tokio::test]
    async fn test_rule_error_does_not_block_or_resolve() {
        let (engine, _clock) = engine();
        engine.register_rule(cpu_rule()).await.unwrap();
        engine
            .register_rule(AlertRule::new("broken", "Broken", Condition::custom("explodes")))
            .await
            .unwrap();
        engine.register_predicate(
            "explodes",
            Arc::new(|_: &EvaluationContext, _: &str| -> MonitorResult<bool> {
                Err(MonitorError::Configuration("bad input".to_string()))
            }),
        );

        let events = engine.evaluate(&cpu_context(95.0)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert.rule, "high_cpu_usage");
    }

    #[tokio::test]
    async fn test_scoped_rule_tracks_each_scope() {
        let (engine, _clock) = engine();
        engine
            .register_rule(
                AlertRule::new(
                    "component_critical",
                    "Component {scope} Critical",
                    Condition::health("{scope}", HealthStatus::Critical),
                )
                .with_scope(RuleScope::Components),
            )
            .await
            .unwrap();

        let health: HashMap<String, ComponentHealth> = ["api", "storage"]
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    ComponentHealth {
                        component: name.to_string(),
                        status: HealthStatus::Critical,
                        message: "down".to_string(),
                        metrics: None,
                        last_checked: None,
                        consecutive_failures: 2,
                        total_checks: 2,
                        response_time_ms: None,
                    },
                )
            })
            .collect();
        let ctx = EvaluationContext::new(Default::default(), health);

        let events = engine.evaluate(&ctx).await;
        assert_eq!(events.len(), 2);
        let titles: Vec<String> = engine.active_alerts().await.into_iter().map(|a| a.title).collect();
        assert!(titles.contains(&"Component api Critical".to_string()));
        assert!(titles.contains(&"Component storage Critical".to_string()));
    }

    #[tokio::test]
    async fn test_custom_alert_dedup() {
        let (engine, _clock) = engine();
        let request = CustomAlertRequest {
            title: "Exchange maintenance".to_string(),
            message: "Venue closed".to_string(),
            severity: AlertSeverity::Info,
            category: "ops".to_string(),
            scope: None,
            channels: vec![],
            escalation_secs: None,
        };

        let (first, event) = engine.create_custom_alert(request.clone()).await.unwrap();
        assert!(event.is_some());
        let (second, event) = engine.create_custom_alert(request).await.unwrap();
        assert!(event.is_none());
        assert_eq!(first.id, second.id);
        assert_eq!(second.fire_count, 2);

        let counts = engine.counts_by_severity().await;
        assert_eq!(counts[&AlertSeverity::Info], 1);
        assert_eq!(counts[&AlertSeverity::Critical], 0);
    }

    #[tokio::test]
    async fn test_threshold_rule_uses_rule_severity() {
        let (engine, _clock) = engine();
        engine
            .register_rule(
                AlertRule::new(
                    "cpu_pegged",
                    "CPU Pegged",
                    Condition::threshold("cpu_usage", ComparisonOperator::GreaterThanOrEqual, 99.0),
                )
                .with_severity(AlertSeverity::Emergency)
                .with_channels(&["pager"]),
            )
            .await
            .unwrap();

        let events = engine.evaluate(&cpu_context(99.5)).await;
        assert_eq!(events[0].alert.severity, AlertSeverity::Emergency);
        assert_eq!(events[0].channels, vec!["pager"]);
    }
}
