//! Declarative alert rules
//!
//! A rule is plain data: a tagged [`Condition`] tree evaluated against one
//! [`EvaluationContext`] per scope. The only opaque piece is
//! [`Condition::Custom`], which names a predicate function registered on the
//! alert engine.

use crate::config::{AlertConfig, ThresholdConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::health::{ComponentHealth, HealthStatus};
use crate::monitoring::metrics::MetricsSnapshot;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

pub const SCOPE_PLACEHOLDER: &str = "{scope}";
pub const SYSTEM_SCOPE: &str = "system";

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertSeverity {
    /// One level up, saturating at `Emergency`
    pub fn escalated(self) -> Self {
        match self {
            AlertSeverity::Info => AlertSeverity::Warning,
            AlertSeverity::Warning => AlertSeverity::Critical,
            AlertSeverity::Critical | AlertSeverity::Emergency => AlertSeverity::Emergency,
        }
    }

    pub fn all() -> [AlertSeverity; 4] {
        [
            AlertSeverity::Info,
            AlertSeverity::Warning,
            AlertSeverity::Critical,
            AlertSeverity::Emergency,
        ]
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
            AlertSeverity::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// Comparison operators for threshold conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
}

impl ComparisonOperator {
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => left > right,
            ComparisonOperator::GreaterThanOrEqual => left >= right,
            ComparisonOperator::LessThan => left < right,
            ComparisonOperator::LessThanOrEqual => left <= right,
            ComparisonOperator::Equal => (left - right).abs() < f64::EPSILON,
            ComparisonOperator::NotEqual => (left - right).abs() >= f64::EPSILON,
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterThanOrEqual => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessThanOrEqual => "<=",
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Threshold {
        metric: String,
        operator: ComparisonOperator,
        value: f64,
    },
    /// Fires at `warning`, graded critical at `critical`
    Bands {
        metric: String,
        warning: f64,
        critical: f64,
    },
    Health {
        component: String,
        at_least: HealthStatus,
    },
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    Custom {
        predicate: String,
    },
}

/// Result of evaluating a condition for one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clear,
    /// `severity` overrides the rule severity when the condition grades itself
    Fire { severity: Option<AlertSeverity> },
}

impl Verdict {
    pub fn fired(self) -> bool {
        matches!(self, Verdict::Fire { .. })
    }

    fn graded(self) -> Option<AlertSeverity> {
        match self {
            Verdict::Fire { severity } => severity,
            Verdict::Clear => None,
        }
    }
}

/// Everything a rule may look at during one evaluation tick
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub metrics: MetricsSnapshot,
    pub health: HashMap<String, ComponentHealth>,
}

impl EvaluationContext {
    pub fn new(metrics: MetricsSnapshot, health: HashMap<String, ComponentHealth>) -> Self {
        Self { metrics, health }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.value(name)
    }

    pub fn health_of(&self, component: &str) -> Option<HealthStatus> {
        self.health.get(component).map(|h| h.status)
    }
}

pub type CustomPredicate = Arc<dyn Fn(&EvaluationContext, &str) -> MonitorResult<bool> + Send + Sync>;

pub type PredicateRegistry = HashMap<String, CustomPredicate>;

fn scoped(name: &str, scope: &str) -> String {
    name.replace(SCOPE_PLACEHOLDER, scope)
}

impl Condition {
    pub fn threshold(metric: &str, operator: ComparisonOperator, value: f64) -> Self {
        Condition::Threshold {
            metric: metric.to_string(),
            operator,
            value,
        }
    }

    pub fn bands(metric: &str, warning: f64, critical: f64) -> Self {
        Condition::Bands {
            metric: metric.to_string(),
            warning,
            critical,
        }
    }

    pub fn health(component: &str, at_least: HealthStatus) -> Self {
        Condition::Health {
            component: component.to_string(),
            at_least,
        }
    }

    pub fn custom(predicate: &str) -> Self {
        Condition::Custom {
            predicate: predicate.to_string(),
        }
    }

    /// Evaluate for `scope`. Metrics or components that do not exist yet leave the condition clear.
    pub fn evaluate(
        &self,
        ctx: &EvaluationContext,
        scope: &str,
        predicates: &PredicateRegistry,
    ) -> MonitorResult<Verdict> {
        match self {
            Condition::Threshold {
                metric,
                operator,
                value,
            } => Ok(match ctx.metric(&scoped(metric, scope)) {
                Some(current) if operator.compare(current, *value) => Verdict::Fire { severity: None },
                _ => Verdict::Clear,
            }),
            Condition::Bands {
                metric,
                warning,
                critical,
            } => Ok(match ctx.metric(&scoped(metric, scope)) {
                Some(current) if current >= *critical => Verdict::Fire {
                    severity: Some(AlertSeverity::Critical),
                },
                Some(current) if current >= *warning => Verdict::Fire {
                    severity: Some(AlertSeverity::Warning),
                },
                _ => Verdict::Clear,
            }),
            Condition::Health {
                component,
                at_least,
            } => Ok(match ctx.health_of(&scoped(component, scope)) {
                Some(status) if status.at_least(*at_least) => Verdict::Fire { severity: None },
                _ => Verdict::Clear,
            }),
            Condition::All { conditions } => {
                if conditions.is_empty() {
                    return Ok(Verdict::Clear);
                }
                let mut severity = None;
                for condition in conditions {
                    match condition.evaluate(ctx, scope, predicates)? {
                        Verdict::Clear => return Ok(Verdict::Clear),
                        fired => severity = severity.max(fired.graded()),
                    }
                }
                Ok(Verdict::Fire { severity })
            }
            Condition::Any { conditions } => {
                let mut result = Verdict::Clear;
                for condition in conditions {
                    let verdict = condition.evaluate(ctx, scope, predicates)?;
                    if verdict.fired() {
                        let severity = result.graded().max(verdict.graded());
                        result = Verdict::Fire { severity };
                    }
                }
                Ok(result)
            }
            Condition::Not { condition } => Ok(match condition.evaluate(ctx, scope, predicates)? {
                Verdict::Clear => Verdict::Fire { severity: None },
                Verdict::Fire { .. } => Verdict::Clear,
            }),
            Condition::Custom { predicate } => {
                let function = predicates.get(predicate).ok_or_else(|| MonitorError::RuleEvaluation {
                    rule: predicate.clone(),
                    reason: format!("predicate '{}' is not registered", predicate),
                })?;
                let outcome = catch_unwind(AssertUnwindSafe(|| (function.as_ref())(ctx, scope))).map_err(|_| {
                    MonitorError::RuleEvaluation {
                        rule: predicate.clone(),
                        reason: format!("predicate '{}' panicked", predicate),
                    }
                })?;
                Ok(if outcome? {
                    Verdict::Fire { severity: None }
                } else {
                    Verdict::Clear
                })
            }
        }
    }

    /// Metric names this condition reads for `scope`
    pub fn referenced_metrics(&self, scope: &str) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_metrics(scope, &mut names);
        names.dedup();
        names
    }

    fn collect_metrics(&self, scope: &str, out: &mut Vec<String>) {
        match self {
            Condition::Threshold { metric, .. } | Condition::Bands { metric, .. } => {
                out.push(scoped(metric, scope))
            }
            Condition::All { conditions } | Condition::Any { conditions } => {
                for condition in conditions {
                    condition.collect_metrics(scope, out);
                }
            }
            Condition::Not { condition } => condition.collect_metrics(scope, out),
            Condition::Health { .. } | Condition::Custom { .. } => {}
        }
    }
}

/// Which scopes a rule is evaluated for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "names", rename_all = "snake_case")]
pub enum RuleScope {
    #[default]
    System,
    Named(Vec<String>),
    /// Every component known to the health checker
    Components,
}

impl RuleScope {
    pub fn resolve(&self, ctx: &EvaluationContext) -> Vec<String> {
        match self {
            RuleScope::System => vec![SYSTEM_SCOPE.to_string()],
            RuleScope::Named(names) => names.clone(),
            RuleScope::Components => {
                let mut names: Vec<String> = ctx.health.keys().cloned().collect();
                names.sort();
                names
            }
        }
    }
}

fn default_severity() -> AlertSeverity {
    AlertSeverity::Warning
}

fn default_category() -> String {
    "custom".to_string()
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub condition: Condition,
    #[serde(default = "default_severity")]
    pub severity: AlertSeverity,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub escalation_secs: Option<u64>,
    /// Empty means the engine's default channels
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_resolve: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(name: &str, title: &str, condition: Condition) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            description: String::new(),
            condition,
            severity: default_severity(),
            category: default_category(),
            scope: RuleScope::System,
            cooldown_secs: default_cooldown_secs(),
            escalation_secs: None,
            channels: Vec::new(),
            auto_resolve: true,
            enabled: true,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = cooldown.as_secs();
        self
    }

    pub fn with_escalation(mut self, after: Duration) -> Self {
        self.escalation_secs = Some(after.as_secs());
        self
    }

    pub fn with_channels(mut self, channels: &[&str]) -> Self {
        self.channels = channels.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn manual_resolve(mut self) -> Self {
        self.auto_resolve = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn escalation(&self) -> Option<Duration> {
        self.escalation_secs.map(Duration::from_secs)
    }

    pub fn render_title(&self, scope: &str) -> String {
        scoped(&self.title, scope)
    }

    /// Description plus the current value of every metric the condition reads
    pub fn render_message(&self, ctx: &EvaluationContext, scope: &str) -> String {
        let mut message = if self.description.is_empty() {
            self.render_title(scope)
        } else {
            scoped(&self.description, scope)
        };

        let readings: Vec<String> = self
            .condition
            .referenced_metrics(scope)
            .into_iter()
            .filter_map(|name| ctx.metric(&name).map(|v| format!("{}={:.2}", name, v)))
            .collect();
        if !readings.is_empty() {
            message.push_str(&format!(" ({})", readings.join(", ")));
        }
        message
    }

    pub fn validate(&self) -> MonitorResult<()> {
        if self.name.trim().is_empty() {
            return Err(MonitorError::Configuration("Rule name cannot be empty".to_string()));
        }
        if self.escalation_secs == Some(0) {
            return Err(MonitorError::Configuration(format!(
                "Rule '{}' escalation delay must be greater than 0",
                self.name
            )));
        }
        if let Condition::Bands {
            warning, critical, ..
        } = &self.condition
        {
            if warning > critical {
                return Err(MonitorError::Configuration(format!(
                    "Rule '{}' warning band {} exceeds critical band {}",
                    self.name, warning, critical
                )));
            }
        }
        Ok(())
    }
}

/// Built-in rule set derived from the configured thresholds
pub fn default_rules(thresholds: &ThresholdConfig, alerts: &AlertConfig) -> Vec<AlertRule> {
    let t = thresholds;
    let rules = vec![
        AlertRule::new(
            "high_cpu_usage",
            "High CPU Usage",
            Condition::bands("cpu_usage", t.cpu_warning, t.cpu_critical),
        )
        .with_description("CPU usage is above its threshold")
        .with_category("system"),
        AlertRule::new(
            "high_memory_usage",
            "High Memory Usage",
            Condition::bands("memory_usage", t.memory_warning, t.memory_critical),
        )
        .with_description("Memory usage is above its threshold")
        .with_category("system"),
        AlertRule::new(
            "high_disk_usage",
            "High Disk Usage",
            Condition::bands("disk_usage", t.disk_warning, t.disk_critical),
        )
        .with_description("Disk usage is above its threshold")
        .with_category("system"),
        AlertRule::new(
            "high_api_error_rate",
            "High API Error Rate",
            Condition::bands("api_error_rate", t.api_error_rate_warning, t.api_error_rate_critical),
        )
        .with_description("Exchange API calls are failing")
        .with_category("api"),
        AlertRule::new(
            "slow_api_responses",
            "Slow API Responses",
            Condition::bands("api_latency_ms", t.api_latency_warning_ms, t.api_latency_critical_ms),
        )
        .with_description("Exchange API latency is above its threshold")
        .with_category("api"),
        AlertRule::new(
            "slow_trade_execution",
            "Slow Trade Execution",
            Condition::bands(
                "trade_execution_ms",
                t.trade_latency_warning_ms,
                t.trade_latency_critical_ms,
            ),
        )
        .with_description("Average order execution latency is above its threshold")
        .with_category("trading"),
        AlertRule::new(
            "component_critical",
            "Component {scope} Critical",
            Condition::health(SCOPE_PLACEHOLDER, HealthStatus::Critical),
        )
        .with_description("Health check for {scope} reports critical")
        .with_severity(AlertSeverity::Critical)
        .with_category("health")
        .with_scope(RuleScope::Components),
    ];

    rules
        .into_iter()
        .map(|mut rule| {
            rule.cooldown_secs = alerts.default_cooldown_secs;
            rule.escalation_secs = alerts.default_escalation_secs;
            rule
        })
        .collect()
}
