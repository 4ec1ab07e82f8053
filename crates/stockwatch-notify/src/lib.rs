//! Notification batching and the chat-webhook transport.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use stockwatch_core::{ChangeKind, ChangeSet, Product};
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "stockwatch-notify";

/// Webhook messages may carry at most this many embeds.
pub const MAX_ITEMS_PER_MESSAGE: usize = 10;
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);

pub const COLOR_NEW: u32 = 0x00b0f4;
pub const COLOR_RESTOCK: u32 = 0x57f287;
pub const FOOTER_TEXT: &str = "Games Island Monitor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

impl Embed {
    pub fn for_change(kind: ChangeKind, product: &Product) -> Self {
        let (marker, color) = match kind {
            ChangeKind::New => ("🆕", COLOR_NEW),
            ChangeKind::Restocked => ("🔄", COLOR_RESTOCK),
        };
        Self {
            title: format!("{marker} {}", product.name),
            url: Some(product.url.clone()).filter(|u| !u.is_empty()),
            color,
            fields: vec![EmbedField {
                name: "Category".to_string(),
                value: product.category.clone(),
                inline: true,
            }],
            footer: Some(EmbedFooter {
                text: FOOTER_TEXT.to_string(),
            }),
        }
    }
}

/// One webhook call worth of embeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookMessage {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    fn describe(&self) -> String;
    async fn send(&self, message: &WebhookMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct DiscordWebhook {
    client: reqwest::Client,
    url: String,
}

impl DiscordWebhook {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationTransport for DiscordWebhook {
    fn describe(&self) -> String {
        // The webhook URL embeds its secret token, keep it out of logs.
        "discord webhook".to_string()
    }

    async fn send(&self, message: &WebhookMessage) -> Result<(), NotifyError> {
        let resp = self.client.post(&self.url).json(message).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Turns a change set into size-capped webhook messages and sends them one
/// at a time, sleeping `pacing` between sends.
#[derive(Debug, Clone, Copy)]
pub struct NotificationBatcher {
    max_per_message: usize,
    pacing: Duration,
}

impl Default for NotificationBatcher {
    fn default() -> Self {
        Self::new(MAX_ITEMS_PER_MESSAGE, DEFAULT_PACING)
    }
}

impl NotificationBatcher {
    pub fn new(max_per_message: usize, pacing: Duration) -> Self {
        Self {
            max_per_message: max_per_message.clamp(1, MAX_ITEMS_PER_MESSAGE),
            pacing,
        }
    }

    pub fn build_messages(&self, changes: &ChangeSet) -> Vec<WebhookMessage> {
        let embeds: Vec<Embed> = changes
            .iter()
            .map(|(kind, product)| Embed::for_change(kind, product))
            .collect();
        embeds
            .chunks(self.max_per_message)
            .map(|chunk| WebhookMessage {
                embeds: chunk.to_vec(),
            })
            .collect()
    }

    /// Sends every message in order. The first failure aborts the batch;
    /// messages already sent stay sent.
    pub async fn deliver(
        &self,
        transport: &dyn NotificationTransport,
        messages: &[WebhookMessage],
    ) -> Result<usize, NotifyError> {
        for (index, message) in messages.iter().enumerate() {
            transport.send(message).await?;
            debug!(
                chunk = index + 1,
                of = messages.len(),
                embeds = message.embeds.len(),
                "sent notification chunk"
            );
            if index + 1 < messages.len() {
                tokio::time::sleep(self.pacing).await;
            }
        }
        Ok(messages.len())
    }

    pub async fn notify(
        &self,
        transport: &dyn NotificationTransport,
        changes: &ChangeSet,
    ) -> Result<usize, NotifyError> {
        let messages = self.build_messages(changes);
        if messages.is_empty() {
            return Ok(0);
        }
        let sent = self.deliver(transport, &messages).await?;
        info!(
            new = changes.new_products.len(),
            restocked = changes.restocked.len(),
            messages = sent,
            transport = %transport.describe(),
            "notified"
        );
        Ok(sent)
    }
}
