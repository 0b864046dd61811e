//! Fan-out of alert events to notification channels
//!
//! Each channel send runs in its own task under the channel's timeout. A
//! failing, hanging or panicking channel turns into a failed
//! [`DeliveryReport`]; it never reaches the caller and never delays the other
//! channels. The dispatcher does not retry.

use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::alerts::Alert;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, error, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Fired,
    Escalated,
    Resolved,
    Acknowledged,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Fired => write!(f, "FIRED"),
            EventKind::Escalated => write!(f, "ESCALATED"),
            EventKind::Resolved => write!(f, "RESOLVED"),
            EventKind::Acknowledged => write!(f, "ACKNOWLEDGED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub kind: EventKind,
    pub alert: Alert,
    pub payload: String,
    pub channels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(kind: EventKind, alert: &Alert, channels: Vec<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id: alert.id,
            kind,
            alert: alert.clone(),
            payload: render_payload(kind, alert),
            channels,
            created_at: at,
        }
    }

    /// One-line summary used as email subject and chat headline
    pub fn subject(&self) -> String {
        format!("[{}] {} {}", self.alert.severity, self.alert.title, self.kind)
    }
}

fn render_payload(kind: EventKind, alert: &Alert) -> String {
    let mut text = format!(
        "[{}] {} {}\n{}\nscope: {} | category: {} | fired {}x",
        alert.severity, alert.title, kind, alert.message, alert.scope, alert.category, alert.fire_count
    );
    match kind {
        EventKind::Acknowledged => {
            if let Some(actor) = &alert.acknowledged_by {
                text.push_str(&format!("\nacknowledged by {}", actor));
            }
        }
        EventKind::Resolved => {
            if let Some(at) = alert.resolved_at {
                text.push_str(&format!("\nresolved at {}", at.to_rfc3339()));
            }
        }
        EventKind::Escalated => {
            text.push_str(&format!("\nopen since {}", alert.created_at.to_rfc3339()));
        }
        EventKind::Fired => {}
    }
    text
}

/// Delivery mechanism for notification events
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn send(&self, event: &NotificationEvent) -> MonitorResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl DeliveryReport {
    fn failed(channel: &str, error: MonitorError, elapsed: Duration) -> Self {
        Self {
            channel: channel.to_string(),
            success: false,
            error: Some(error.to_string()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub sent: u64,
    pub failed: u64,
    pub last_error: Option<String>,
    pub last_delivery: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct NotificationDispatcher {
    channels: RwLock<HashMap<String, Arc<dyn NotificationChannel>>>,
    stats: Mutex<HashMap<String, ChannelStats>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel, replacing any channel with the same name
    pub async fn register_channel(&self, channel: Arc<dyn NotificationChannel>) {
        let name = channel.name().to_string();
        info!("Registered notification channel: {}", name);
        self.channels.write().await.insert(name, channel);
    }

    pub async fn remove_channel(&self, name: &str) -> bool {
        self.channels.write().await.remove(name).is_some()
    }

    pub async fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Send to the channels named on the event
    pub async fn dispatch_event(&self, event: &NotificationEvent) -> Vec<DeliveryReport> {
        self.dispatch(event, &event.channels).await
    }

    /// Send `event` to every named channel concurrently; one report per distinct channel name
    pub async fn dispatch(&self, event: &NotificationEvent, channels: &[String]) -> Vec<DeliveryReport> {
        let mut targets: Vec<&String> = Vec::with_capacity(channels.len());
        for name in channels {
            if !targets.contains(&name) {
                targets.push(name);
            }
        }

        let registered = self.channels.read().await.clone();
        let shared = Arc::new(event.clone());

        let sends = targets.into_iter().map(|name| {
            let channel = registered.get(name).cloned();
            let event = Arc::clone(&shared);
            let name = name.clone();
            async move {
                let Some(channel) = channel else {
                    return DeliveryReport::failed(
                        &name,
                        MonitorError::NotificationFailure {
                            channel: name.clone(),
                            reason: "channel is not registered".to_string(),
                        },
                        Duration::ZERO,
                    );
                };
                let timeout = channel.timeout();
                let started = Instant::now();
                let task = tokio::spawn(async move {
                    tokio::time::timeout(timeout, channel.send(&event)).await
                });
                let reason = match task.await {
                    Ok(Ok(Ok(()))) => {
                        return DeliveryReport {
                            channel: name,
                            success: true,
                            error: None,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        };
                    }
                    Ok(Ok(Err(e))) => e.to_string(),
                    Ok(Err(_)) => format!("timed out after {}ms", timeout.as_millis()),
                    Err(e) if e.is_panic() => "channel panicked".to_string(),
                    Err(e) => format!("send task aborted: {}", e),
                };
                DeliveryReport::failed(
                    &name,
                    MonitorError::NotificationFailure {
                        channel: name.clone(),
                        reason,
                    },
                    started.elapsed(),
                )
            }
        });

        let reports = join_all(sends).await;
        self.record(event, &reports);
        reports
    }

    fn record(&self, event: &NotificationEvent, reports: &[DeliveryReport]) {
        let mut stats = self.stats.lock();
        for report in reports {
            let entry = stats.entry(report.channel.clone()).or_default();
            if report.success {
                entry.sent += 1;
                entry.last_delivery = Some(Utc::now());
                debug!("Delivered {} for alert {} via {}", event.kind, event.alert_id, report.channel);
            } else {
                entry.failed += 1;
                entry.last_error = report.error.clone();
                error!(
                    "Failed to deliver {} for alert {}: {}",
                    event.kind,
                    event.alert_id,
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    pub fn stats(&self) -> HashMap<String, ChannelStats> {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::rules::AlertSeverity;

    struct RecordingChannel {
        name: String,
        seen: Mutex<Vec<EventKind>>,
    }

    impl RecordingChannel {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, event: &NotificationEvent) -> MonitorResult<()> {
            self.seen.lock().push(event.kind);
            Ok(())
        }
    }

    struct BrokenChannel;

    #[async_trait]
    impl NotificationChannel for BrokenChannel {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send(&self, _event: &NotificationEvent) -> MonitorResult<()> {
            Err(MonitorError::Http("invalid credentials".to_string()))
        }
    }

    struct StuckChannel;

    #[async_trait]
    impl NotificationChannel for StuckChannel {
        fn name(&self) -> &str {
            "stuck"
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        async fn send(&self, _event: &NotificationEvent) -> MonitorResult<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    struct PanickingChannel;

    #[async_trait]
    impl NotificationChannel for PanickingChannel {
        fn name(&self) -> &str {
            "panics"
        }

        async fn send(&self, _event: &NotificationEvent) -> MonitorResult<()> {
            panic!("adapter bug");
        }
    }

    fn event(kind: EventKind, channels: &[&str]) -> NotificationEvent {
        let alert = Alert::new(
            "high_cpu_usage",
            "system",
            AlertSeverity::Critical,
            "system",
            "High CPU Usage",
            "CPU usage is above its threshold",
            Utc::now(),
        );
        NotificationEvent::new(kind, &alert, channels.iter().map(|c| c.to_string()).collect(), Utc::now())
    }

    #[tokio::test]
    async fn test_failures_do_not_block_other_channels() {
        let dispatcher = NotificationDispatcher::new();
        let good = RecordingChannel::new("good");
        dispatcher.register_channel(good.clone()).await;
        dispatcher.register_channel(Arc::new(BrokenChannel)).await;
        dispatcher.register_channel(Arc::new(StuckChannel)).await;
        dispatcher.register_channel(Arc::new(PanickingChannel)).await;

        let event = event(EventKind::Fired, &["broken", "stuck", "panics", "good", "missing"]);
        let reports = dispatcher.dispatch_event(&event).await;

        assert_eq!(reports.len(), 5);
        assert_eq!(*good.seen.lock(), vec![EventKind::Fired]);

        let by_name: HashMap<_, _> = reports.iter().map(|r| (r.channel.as_str(), r)).collect();
        assert!(by_name["good"].success);
        assert!(by_name["broken"].error.as_ref().unwrap().contains("invalid credentials"));
        assert!(by_name["stuck"].error.as_ref().unwrap().contains("timed out"));
        assert!(by_name["panics"].error.as_ref().unwrap().contains("panicked"));
        assert!(by_name["missing"].error.as_ref().unwrap().contains("not registered"));

        let stats = dispatcher.stats();
        assert_eq!(stats["good"].sent, 1);
        assert_eq!(stats["broken"].failed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_channel_names_send_once() {
        let dispatcher = NotificationDispatcher::new();
        let good = RecordingChannel::new("good");
        dispatcher.register_channel(good.clone()).await;

        let event = event(EventKind::Resolved, &[]);
        let reports = dispatcher
            .dispatch(&event, &["good".to_string(), "good".to_string()])
            .await;

        assert_eq!(reports.len(), 1);
        assert_eq!(good.seen.lock().len(), 1);
    }

    #[test]
    fn test_payload_rendering() {
        let event = event(EventKind::Escalated, &["log"]);
        assert!(event.payload.starts_with("[CRITICAL] High CPU Usage ESCALATED"));
        assert!(event.payload.contains("open since"));
        assert_eq!(event.subject(), "[CRITICAL] High CPU Usage ESCALATED");
    }
}
