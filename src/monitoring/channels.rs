//! Notification channel adapters
//!
//! Every adapter is built from a [`ChannelConfig`] entry by [`build_channel`].

use crate::config::ChannelConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::notification::{EventKind, NotificationChannel, NotificationEvent};
use crate::monitoring::rules::AlertSeverity;

use async_trait::async_trait;
use log::{error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn failure(channel: &str, reason: impl std::fmt::Display) -> MonitorError {
    MonitorError::NotificationFailure {
        channel: channel.to_string(),
        reason: reason.to_string(),
    }
}

/// Writes events to the process log at a level matching the alert severity
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &NotificationEvent) -> MonitorResult<()> {
        if event.kind == EventKind::Resolved {
            info!("🔔 {}", event.payload);
            return Ok(());
        }
        match event.alert.severity {
            AlertSeverity::Emergency | AlertSeverity::Critical => error!("🚨 {}", event.payload),
            AlertSeverity::Warning => warn!("⚠️ {}", event.payload),
            AlertSeverity::Info => info!("🔔 {}", event.payload),
        }
        Ok(())
    }
}

/// Appends each event as one JSON line
pub struct FileChannel {
    name: String,
    path: PathBuf,
}

impl FileChannel {
    pub fn new(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &NotificationEvent) -> MonitorResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// POSTs the serialized event as JSON
pub struct WebhookChannel {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: &str, url: &str, headers: HashMap<String, String>, timeout: Duration) -> MonitorResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            headers,
            timeout,
            client,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, event: &NotificationEvent) -> MonitorResult<()> {
        let mut request = self.client.post(&self.url).json(event);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|e| failure(&self.name, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failure(&self.name, format!("webhook returned HTTP {}", status.as_u16())));
        }
        Ok(())
    }
}

/// Posts the rendered payload to a Slack incoming webhook
pub struct SlackChannel {
    name: String,
    webhook_url: String,
    channel: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(name: &str, webhook_url: &str, channel: Option<String>, timeout: Duration) -> MonitorResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.to_string(),
            webhook_url: webhook_url.to_string(),
            channel,
            timeout,
            client,
        })
    }

    fn message(&self, event: &NotificationEvent) -> serde_json::Value {
        let icon = match (event.kind, event.alert.severity) {
            (EventKind::Resolved, _) => ":white_check_mark:",
            (_, AlertSeverity::Emergency | AlertSeverity::Critical) => ":rotating_light:",
            (_, AlertSeverity::Warning) => ":warning:",
            (_, AlertSeverity::Info) => ":information_source:",
        };
        let mut body = json!({
            "text": format!("{} *{}*\n{}", icon, event.subject(), event.alert.message),
        });
        if let Some(channel) = &self.channel {
            body["channel"] = json!(channel);
        }
        body
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, event: &NotificationEvent) -> MonitorResult<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.message(event))
            .send()
            .await
            .map_err(|e| failure(&self.name, e))?;
        if !response.status().is_success() {
            return Err(failure(
                &self.name,
                format!("slack returned HTTP {}", response.status().as_u16()),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

/// SMTP delivery, available with the `email` feature
pub struct EmailChannel {
    name: String,
    settings: EmailSettings,
    timeout: Duration,
}

impl EmailChannel {
    pub fn new(name: &str, settings: EmailSettings, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            settings,
            timeout,
        }
    }

    #[cfg(feature = "email")]
    async fn deliver(&self, event: &NotificationEvent) -> MonitorResult<()> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::message::Mailbox;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.settings.smtp_host)
            .map_err(|e| failure(&self.name, e))?
            .port(self.settings.smtp_port)
            .timeout(Some(self.timeout));
        if let (Some(user), Some(pass)) = (&self.settings.username, &self.settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let transport = builder.build();

        let from = self
            .settings
            .from
            .parse::<Mailbox>()
            .map_err(|e| failure(&self.name, format!("invalid sender: {}", e)))?;
        for recipient in &self.settings.to {
            let email = Message::builder()
                .from(from.clone())
                .to(recipient
                    .parse::<Mailbox>()
                    .map_err(|e| failure(&self.name, format!("invalid recipient {}: {}", recipient, e)))?)
                .subject(event.subject())
                .body(event.payload.clone())
                .map_err(|e| failure(&self.name, e))?;
            transport.send(email).await.map_err(|e| failure(&self.name, e))?;
        }
        Ok(())
    }

    #[cfg(not(feature = "email"))]
    async fn deliver(&self, _event: &NotificationEvent) -> MonitorResult<()> {
        Err(failure(
            &self.name,
            format!(
                "email support is not compiled in; cannot reach {}:{}",
                self.settings.smtp_host, self.settings.smtp_port
            ),
        ))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, event: &NotificationEvent) -> MonitorResult<()> {
        if self.settings.to.is_empty() {
            return Err(failure(&self.name, "no recipients configured"));
        }
        self.deliver(event).await
    }
}

pub fn build_channel(config: &ChannelConfig) -> MonitorResult<Arc<dyn NotificationChannel>> {
    let channel: Arc<dyn NotificationChannel> = match config {
        ChannelConfig::Log { name } => Arc::new(LogChannel::new(name)),
        ChannelConfig::File { name, path } => Arc::new(FileChannel::new(name, path.clone())),
        ChannelConfig::Webhook {
            name,
            url,
            headers,
            timeout_ms,
        } => Arc::new(WebhookChannel::new(
            name,
            url,
            headers.clone(),
            Duration::from_millis(*timeout_ms),
        )?),
        ChannelConfig::Slack {
            name,
            webhook_url,
            channel,
            timeout_ms,
        } => Arc::new(SlackChannel::new(
            name,
            webhook_url,
            channel.clone(),
            Duration::from_millis(*timeout_ms),
        )?),
        ChannelConfig::Email {
            name,
            smtp_host,
            smtp_port,
            username,
            password,
            from,
            to,
            timeout_ms,
        } => Arc::new(EmailChannel::new(
            name,
            EmailSettings {
                smtp_host: smtp_host.clone(),
                smtp_port: *smtp_port,
                username: username.clone(),
                password: password.clone(),
                from: from.clone(),
                to: to.clone(),
            },
            Duration::from_millis(*timeout_ms),
        )),
    };
    Ok(channel)
}
