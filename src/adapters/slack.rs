//! Slack incoming-webhook client for operational alerts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::AlertSink;

/// Longest alert text we send; the rest is cut
pub const MAX_ALERT_CHARS: usize = 200;

/// Slack webhook client
pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client,
        }
    }
}

/// Cut a message to at most [`MAX_ALERT_CHARS`] characters
pub fn truncate_alert(message: &str) -> &str {
    match message.char_indices().nth(MAX_ALERT_CHARS) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

#[async_trait]
impl AlertSink for SlackNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        let payload = SlackPayload {
            text: truncate_alert(message),
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send Slack notification")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Slack webhook error ({}): {}", status, text)
        }

        Ok(())
    }
}
