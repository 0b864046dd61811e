//! # tradewatch
//!
//! Tradewatch is the monitoring and alerting core of a trading system.
//! It samples host resources, tracks trade execution and API latency,
//! probes the health of every component, evaluates alert rules on a
//! schedule and fans notifications out to log, file, webhook, Slack and
//! email channels.
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! tradewatch = "0.3"
//! ```
//!
//! Email delivery needs the `email` feature.
//!
//! ## Features
//!
//! - Metric registry with gauges, counters and rolling averages
//! - Concurrent health probes with per-probe timeouts and failure thresholds
//! - Alert engine with deduplication, cooldown, escalation and auto-resolve
//! - Serializable rule conditions (threshold, warning/critical bands, health, composites)
//! - Notification dispatch isolated per channel, with retries
//! - HTTP console and Prometheus exposition
//! - CLI to run, check and validate a configuration
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tradewatch::config::MonitorConfig;
//! use tradewatch::monitoring::{SystemMonitor, TradeSide};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let monitor = Arc::new(SystemMonitor::new(MonitorConfig::default()).await?);
//!     monitor.start();
//!
//!     // Report a fill from the execution path
//!     monitor
//!         .performance()
//!         .record_trade_execution("BTC-USD", TradeSide::Buy, 0.5, 64_000.0, 12.5);
//!
//!     let status = monitor.get_system_status().await;
//!     println!("overall health: {}", status.overall_health);
//!
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom health checks
//!
//! ```no_run
//! use std::sync::Arc;
//! use tradewatch::monitoring::{FnProbe, HealthChecker, ProbeOutcome};
//!
//! # async fn register(checker: &HealthChecker) {
//! checker
//!     .register_check(
//!         "order_gateway",
//!         Arc::new(FnProbe::new(|| async { Ok(ProbeOutcome::healthy("session logged on")) })),
//!     )
//!     .await;
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod web_console;

pub use config::MonitorConfig;
pub use error::{MonitorError, MonitorResult};
pub use monitoring::SystemMonitor;

/// Commonly used types in one import
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::{ChannelConfig, MonitorConfig};
    pub use crate::error::{MonitorError, MonitorResult};
    pub use crate::monitoring::{
        Alert, AlertEngine, AlertRule, AlertSeverity, AlertState, ComparisonOperator, ComponentHealth, Condition,
        CustomAlertRequest, EvaluationContext, HealthChecker, HealthProbe, HealthStatus, MetricKind,
        MetricMetadata, MetricRegistry, NotificationChannel, NotificationDispatcher, NotificationEvent,
        PerformanceMonitor, ProbeOutcome, RuleScope, SystemMonitor, SystemStatus, TradeSide,
    };
}
