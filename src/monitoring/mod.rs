/// Alert state machine: dedup, cooldown, escalation and audit
pub mod alerts;
/// Log, file, webhook, Slack and email notification adapters
pub mod channels;
/// Component health probes and the health checker
pub mod health;
/// Named gauges, counters and rolling averages
pub mod metrics;
/// Notification events and concurrent channel dispatch
pub mod notification;
/// Host resource sampling and trading/API performance metrics
pub mod performance;
/// Alert rules and their serializable conditions
pub mod rules;
/// Coordinator driving the periodic loops
pub mod system;

pub use alerts::{Alert, AlertEngine, AlertState, AuditEntry, CustomAlertRequest, EngineSettings, Resolution};
pub use channels::{build_channel, EmailChannel, FileChannel, LogChannel, SlackChannel, WebhookChannel};
pub use health::{
    ComponentHealth, FnProbe, HealthChecker, HealthProbe, HealthStatus, HttpProbe, ProbeOutcome, ResourceProbe,
    StorageProbe,
};
pub use metrics::{MetricKind, MetricMetadata, MetricRegistry, MetricValue, MetricsSnapshot};
pub use notification::{
    ChannelStats, DeliveryReport, EventKind, NotificationChannel, NotificationDispatcher, NotificationEvent,
};
pub use performance::{PerformanceMonitor, ResourceSample, StaticSampler, SysinfoSampler, SystemSampler, TradeSide};
pub use rules::{
    default_rules, AlertRule, AlertSeverity, ComparisonOperator, Condition, CustomPredicate, EvaluationContext,
    RuleScope, Verdict,
};
pub use system::{deliver_with_retry, SystemMonitor, SystemStatus};
