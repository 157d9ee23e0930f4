//! Alerts and the channels that deliver them.

use crate::config::{AlertChannelConfig, TierDefaults};
use crate::error::{AssetError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Which condition raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Consecutive failures or error rate over threshold.
    Failure,
    /// Response time over threshold.
    Latency,
}

/// One alert, as delivered to every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    pub metrics: serde_json::Value,
}

/// Body POSTed to webhooks.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    timestamp: DateTime<Utc>,
    severity: AlertSeverity,
    message: &'a str,
    metrics: &'a serde_json::Value,
}

/// A destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, alert: &Alert) -> Result<()>;
}

/// Emits alerts as structured log events.
#[derive(Debug, Default)]
pub struct ConsoleAlertSink;

#[async_trait]
impl AlertSink for ConsoleAlertSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        let metrics = alert.metrics.to_string();
        match alert.severity {
            AlertSeverity::Critical => error!(
                kind = ?alert.kind,
                metrics = %metrics,
                "ALERT: {}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                kind = ?alert.kind,
                metrics = %metrics,
                "ALERT: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// POSTs `{timestamp, severity, message, metrics}` as JSON.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TierDefaults::WEBHOOK_TIMEOUT)
            .user_agent(TierDefaults::REMOTE_USER_AGENT)
            .build()
            .map_err(|e| AssetError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        let payload = WebhookPayload {
            timestamp: alert.timestamp,
            severity: alert.severity,
            message: &alert.message,
            metrics: &alert.metrics,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AssetError::Network {
                message: format!("webhook {} unreachable: {}", self.url, e),
            })?;

        if !response.status().is_success() {
            return Err(AssetError::Network {
                message: format!("webhook {} returned {}", self.url, response.status()),
            });
        }
        Ok(())
    }
}

/// Keeps every dispatched alert in memory.
#[derive(Debug, Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl CollectingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AlertSink for CollectingAlertSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());
        Ok(())
    }
}

/// Build sinks from configuration.
pub fn sinks_from_config(channels: &[AlertChannelConfig]) -> Result<Vec<Arc<dyn AlertSink>>> {
    channels
        .iter()
        .map(|channel| -> Result<Arc<dyn AlertSink>> {
            match channel {
                AlertChannelConfig::Console => Ok(Arc::new(ConsoleAlertSink)),
                AlertChannelConfig::Webhook { url } => Ok(Arc::new(WebhookAlertSink::new(url)?)),
            }
        })
        .collect()
}
