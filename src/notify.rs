//! Notification sink.
//!
//! Fire-and-forget by contract: the sentinel spawns a task per message
//! and never waits on delivery, so a slow or broken sink cannot stall
//! report ingestion.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

/// Where state-change and SSL alarms go.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, text: &str, urgent: bool);
}

/// POSTs notifications to a webhook as JSON.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_notification(&self, text: &str, urgent: bool) {
        let payload = json!({
            "message": text,
            "urgent": urgent,
            "timestamp": Utc::now().to_rfc3339(),
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("notification delivered");
            }
            Ok(response) => {
                error!("webhook rejected notification: {}", response.status());
            }
            Err(err) => {
                error!("failed to send notification: {err}");
            }
        }
    }
}

/// Fallback sink that only logs. Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_notification(&self, text: &str, urgent: bool) {
        info!(urgent, "notification: {text}");
    }
}
