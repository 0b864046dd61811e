use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::rules::AlertRule;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "TRADEWATCH_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub intervals: IntervalConfig,
    pub health: HealthConfig,
    pub alerts: AlertConfig,
    pub thresholds: ThresholdConfig,
    pub metrics: MetricsConfig,
    pub channels: Vec<ChannelConfig>,
    /// Extra rules registered next to the defaults
    pub rules: Vec<AlertRule>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Periods of the three coordinator loops
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntervalConfig {
    pub health_check_secs: u64,
    pub metrics_collection_secs: u64,
    pub alert_evaluation_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_timeout_ms: u64,
    /// Consecutive failures before a component is marked critical
    pub failure_threshold: u32,
    pub resource_probe: bool,
    /// Exchange/API endpoint probed with a GET when set
    pub api_endpoint: Option<String>,
    /// Directory probed for writability when set
    pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub default_cooldown_secs: u64,
    pub default_escalation_secs: Option<u64>,
    pub history_limit: usize,
    pub audit_limit: usize,
    pub notification_retries: u32,
    pub retry_delay_ms: u64,
    pub default_channels: Vec<String>,
    /// Added to the rule's channels when an alert escalates
    pub escalation_channels: Vec<String>,
    pub install_default_rules: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub memory_warning: f64,
    pub memory_critical: f64,
    pub disk_warning: f64,
    pub disk_critical: f64,
    pub api_error_rate_warning: f64,
    pub api_error_rate_critical: f64,
    pub api_latency_warning_ms: f64,
    pub api_latency_critical_ms: f64,
    pub trade_latency_warning_ms: f64,
    pub trade_latency_critical_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples kept by rolling-average metrics
    pub rolling_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<PathBuf>,
}

/// A notification channel as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Log {
        name: String,
    },
    File {
        name: String,
        path: PathBuf,
    },
    Webhook {
        name: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_channel_timeout_ms")]
        timeout_ms: u64,
    },
    Slack {
        name: String,
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
        #[serde(default = "default_channel_timeout_ms")]
        timeout_ms: u64,
    },
    Email {
        name: String,
        smtp_host: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        from: String,
        to: Vec<String>,
        #[serde(default = "default_channel_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_channel_timeout_ms() -> u64 {
    10_000
}

fn default_smtp_port() -> u16 {
    587
}

impl ChannelConfig {
    pub fn name(&self) -> &str {
        match self {
            ChannelConfig::Log { name }
            | ChannelConfig::File { name, .. }
            | ChannelConfig::Webhook { name, .. }
            | ChannelConfig::Slack { name, .. }
            | ChannelConfig::Email { name, .. } => name,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            intervals: IntervalConfig::default(),
            health: HealthConfig::default(),
            alerts: AlertConfig::default(),
            thresholds: ThresholdConfig::default(),
            metrics: MetricsConfig::default(),
            channels: vec![ChannelConfig::Log {
                name: "log".to_string(),
            }],
            rules: Vec::new(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            health_check_secs: 30,
            metrics_collection_secs: 10,
            alert_evaluation_secs: 15,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            failure_threshold: 1,
            resource_probe: true,
            api_endpoint: None,
            storage_path: None,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_cooldown_secs: 300,           // 5 minutes
            default_escalation_secs: Some(1_800), // 30 minutes
            history_limit: 1_000,
            audit_limit: 1_000,
            notification_retries: 2,
            retry_delay_ms: 1_000,
            default_channels: vec!["log".to_string()],
            escalation_channels: Vec::new(),
            install_default_rules: true,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_warning: 75.0,
            cpu_critical: 90.0,
            memory_warning: 80.0,
            memory_critical: 95.0,
            disk_warning: 85.0,
            disk_critical: 95.0,
            api_error_rate_warning: 5.0,
            api_error_rate_critical: 20.0,
            api_latency_warning_ms: 1_000.0,
            api_latency_critical_ms: 5_000.0,
            trade_latency_warning_ms: 500.0,
            trade_latency_critical_ms: 2_000.0,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { rolling_window: 100 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

impl IntervalConfig {
    pub fn health_check(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }

    pub fn metrics_collection(&self) -> Duration {
        Duration::from_secs(self.metrics_collection_secs)
    }

    pub fn alert_evaluation(&self) -> Duration {
        Duration::from_secs(self.alert_evaluation_secs)
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl AlertConfig {
    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(self.default_cooldown_secs)
    }

    pub fn default_escalation(&self) -> Option<Duration> {
        self.default_escalation_secs.map(Duration::from_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl MonitorConfig {
    /// Load a configuration file, choosing the parser from its extension
    pub fn load_from_path(path: &Path) -> MonitorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "toml" => toml::from_str::<MonitorConfig>(&content)
                .map_err(|e| MonitorError::Configuration(e.to_string())),
            "yaml" | "yml" => serde_yaml::from_str::<MonitorConfig>(&content)
                .map_err(|e| MonitorError::Configuration(e.to_string())),
            "json" => serde_json::from_str::<MonitorConfig>(&content)
                .map_err(|e| MonitorError::Configuration(e.to_string())),
            _ => Err(MonitorError::Configuration(format!(
                "Unsupported config extension: {}",
                ext
            ))),
        }
    }

    /// Apply `TRADEWATCH_*` environment overrides, returning the keys changed
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(v) = var("HEALTH_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.intervals.health_check_secs = v;
            applied.push("intervals.health_check_secs".to_string());
        }
        if let Some(v) = var("METRICS_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.intervals.metrics_collection_secs = v;
            applied.push("intervals.metrics_collection_secs".to_string());
        }
        if let Some(v) = var("ALERT_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.intervals.alert_evaluation_secs = v;
            applied.push("intervals.alert_evaluation_secs".to_string());
        }
        if let Some(v) = var("API_ENDPOINT") {
            self.health.api_endpoint = Some(v);
            applied.push("health.api_endpoint".to_string());
        }
        if let Some(v) = var("HOST") {
            self.server.host = v;
            applied.push("server.host".to_string());
        }
        if let Some(v) = var("PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
            applied.push("server.port".to_string());
        }
        if let Some(v) = var("LOG_LEVEL") {
            match v.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                    self.logging.level = v.to_lowercase();
                    applied.push("logging.level".to_string());
                }
                _ => {}
            }
        }

        applied
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.intervals.health_check_secs == 0 {
            errors.push("Health check interval must be greater than 0".to_string());
        }
        if self.intervals.metrics_collection_secs == 0 {
            errors.push("Metrics collection interval must be greater than 0".to_string());
        }
        if self.intervals.alert_evaluation_secs == 0 {
            errors.push("Alert evaluation interval must be greater than 0".to_string());
        }

        if self.health.probe_timeout_ms == 0 {
            errors.push("Probe timeout must be greater than 0".to_string());
        }
        if self.health.failure_threshold == 0 {
            errors.push("Failure threshold must be at least 1".to_string());
        }

        if self.metrics.rolling_window == 0 {
            errors.push("Rolling window must hold at least one sample".to_string());
        }
        if self.alerts.history_limit == 0 {
            errors.push("Alert history limit must be greater than 0".to_string());
        }

        let t = &self.thresholds;
        for (label, warning, critical) in [
            ("cpu", t.cpu_warning, t.cpu_critical),
            ("memory", t.memory_warning, t.memory_critical),
            ("disk", t.disk_warning, t.disk_critical),
            ("api error rate", t.api_error_rate_warning, t.api_error_rate_critical),
        ] {
            if !(0.0..=100.0).contains(&warning) || !(0.0..=100.0).contains(&critical) {
                errors.push(format!("{} thresholds must be percentages", label));
            }
            if warning > critical {
                errors.push(format!(
                    "{} warning threshold ({}) exceeds critical threshold ({})",
                    label, warning, critical
                ));
            }
        }
        if t.api_latency_warning_ms > t.api_latency_critical_ms {
            errors.push("api latency warning threshold exceeds critical threshold".to_string());
        }
        if t.trade_latency_warning_ms > t.trade_latency_critical_ms {
            errors.push("trade latency warning threshold exceeds critical threshold".to_string());
        }

        let mut names = HashSet::new();
        for channel in &self.channels {
            if !names.insert(channel.name()) {
                errors.push(format!("Duplicate channel name: {}", channel.name()));
            }
        }
        for name in &self.alerts.default_channels {
            if !names.contains(name.as_str()) {
                errors.push(format!("Default channel '{}' is not configured", name));
            }
        }
        for name in &self.alerts.escalation_channels {
            if !names.contains(name.as_str()) {
                errors.push(format!("Escalation channel '{}' is not configured", name));
            }
        }

        for rule in &self.rules {
            if let Err(e) = rule.validate() {
                errors.push(e.to_string());
            }
            for channel in &rule.channels {
                if !names.contains(channel.as_str()) {
                    errors.push(format!("Rule '{}' targets unknown channel '{}'", rule.name, channel));
                }
            }
        }

        if self.server.enabled && self.server.port == 0 {
            errors.push("Server port cannot be zero".to_string());
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => {}
            other => errors.push(format!("Unknown log level: {}", other)),
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
