//! Error types for the monitoring core
//!
//! Loops recover from these locally; only boundary commands and startup
//! registration hand them back to the caller.

use thiserror::Error;

/// Errors raised by the registry, health checker, alert engine and dispatcher
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Metric '{name}' already registered as {existing}, cannot re-register as {requested}")]
    DuplicateMetric {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Rejected value for metric '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Probe for '{component}' failed: {reason}")]
    ProbeFailure { component: String, reason: String },

    #[error("Rule '{rule}' could not be evaluated: {reason}")]
    RuleEvaluation { rule: String, reason: String },

    #[error("Channel '{channel}' failed to deliver: {reason}")]
    NotificationFailure { channel: String, reason: String },

    #[error("Alert {alert_id} is {state}, cannot {action}")]
    InvalidTransition {
        alert_id: String,
        state: String,
        action: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Json(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Export error: {0}")]
    Export(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Json(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for MonitorError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        MonitorError::Timeout(err.to_string())
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Http(err.to_string())
    }
}

impl From<prometheus::Error> for MonitorError {
    fn from(err: prometheus::Error) -> Self {
        MonitorError::Export(err.to_string())
    }
}

impl MonitorError {
    /// True for errors caused by the caller addressing something that is not there
    pub fn is_not_found(&self) -> bool {
        matches!(self, MonitorError::NotFound(_) | MonitorError::UnknownMetric(_))
    }
}
