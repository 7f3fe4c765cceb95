//! Operator notifications. Best-effort: callers log and drop failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
        }
    }

    /// Single-line rendering for chat webhooks.
    pub fn text(&self) -> String {
        format!("[{:?}] {}: {}", self.severity, self.title, self.message)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> WorkerResult<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> WorkerResult<()> {
        match notification.severity {
            Severity::Info => info!(title = %notification.title, "{}", notification.message),
            Severity::Warning | Severity::Critical => {
                warn!(title = %notification.title, severity = ?notification.severity, "{}", notification.message)
            }
        }
        Ok(())
    }
}

/// Posts `{"text", "title", "message", "severity"}` to a chat-style webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    notification: &'a Notification,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> WorkerResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> WorkerResult<()> {
        let payload = WebhookPayload {
            text: notification.text(),
            notification,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::collaborator_failed(format!("Notification failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::from_http_status("Notification webhook", status, &body));
        }
        Ok(())
    }
}
