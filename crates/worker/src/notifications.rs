//! Concrete audit sinks and alert channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use url::Url;

use guard_core::{Alert, AlertDispatcher, AuditEvent, AuditSink, Error, Result};

/// Audit sink that writes structured records to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        info!(
            target: "audit",
            kind = event.kind.as_str(),
            session_id = ?event.session_id,
            user_id = ?event.user_id,
            origin = ?event.origin,
            recorded_at = %event.recorded_at,
            details = %event.details,
            "Audit event"
        );
        Ok(())
    }
}

/// Alert delivery configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Optional webhook receiving alerts as JSON
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// HTTP request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    1500
}

/// Notification channel.
#[derive(Debug, Clone)]
pub enum NotificationChannel {
    /// Log only (default)
    Log,
    /// POST the alert as JSON
    Webhook { url: Url },
}

/// Alert dispatcher fanning out to every configured channel.
pub struct NotificationDispatcher {
    channels: Vec<NotificationChannel>,
    http: reqwest::Client,
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            channels: vec![NotificationChannel::Log],
            http: reqwest::Client::new(),
        }
    }

    pub fn with_channel(mut self, channel: NotificationChannel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Builds the dispatcher from configuration, validating the webhook URL.
    pub fn from_config(config: &AlertConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;

        let mut dispatcher = Self {
            channels: vec![NotificationChannel::Log],
            http,
        };

        if let Some(raw) = config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            let url = Url::parse(raw)
                .map_err(|e| Error::validation(format!("invalid webhook url {}: {}", raw, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::validation(format!(
                    "webhook url must be http(s), got {}",
                    url.scheme()
                )));
            }
            dispatcher = dispatcher.with_channel(NotificationChannel::Webhook { url });
        }

        Ok(dispatcher)
    }

    pub fn channels(&self) -> &[NotificationChannel] {
        &self.channels
    }
}

#[async_trait]
impl AlertDispatcher for NotificationDispatcher {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        for channel in &self.channels {
            match channel {
                NotificationChannel::Log => {
                    info!(alert_kind = alert.kind(), alert = ?alert, "Alert");
                }
                NotificationChannel::Webhook { url } => {
                    self.http
                        .post(url.clone())
                        .json(alert)
                        .send()
                        .await
                        .and_then(|response| response.error_for_status())
                        .map_err(|e| Error::collaborator("alert_dispatcher", e.to_string()))?;
                }
            }
        }

        Ok(())
    }
}
