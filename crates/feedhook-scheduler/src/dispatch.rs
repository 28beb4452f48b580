//! Webhook delivery — posts one message to a Discord-style webhook.
//! One attempt per call; every failure is logged and reported as `false`.

use std::time::Duration;

use async_trait::async_trait;
use feedhook_core::config::FeedhookConfig;
use feedhook_core::error::{FeedhookError, Result};

use crate::template::truncate;

/// Embed accent color.
pub const EMBED_COLOR: u32 = 0x5865F2;

/// Upper bound on a text message body.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Structured card: title linking to the entry, short description.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedPayload {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
}

/// A single rendered text block.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatedPayload {
    pub content: String,
}

impl TemplatedPayload {
    /// Wrap rendered text, cutting it to [`MAX_CONTENT_CHARS`].
    pub fn new(content: &str) -> Self {
        let content = if content.chars().count() > MAX_CONTENT_CHARS {
            truncate(content, MAX_CONTENT_CHARS - crate::template::ELLIPSIS.len())
        } else {
            content.to_string()
        };
        Self { content }
    }
}

/// Message body. The two shapes never mix in one request.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookPayload {
    Embed(EmbedPayload),
    Templated(TemplatedPayload),
}

/// Everything sent to the destination apart from its URL.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookMessage {
    /// Display name shown as the sender.
    pub username: String,
    pub avatar_url: Option<String>,
    pub payload: WebhookPayload,
}

impl WebhookMessage {
    /// JSON body for the webhook POST.
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({ "username": self.username });
        if let Some(avatar) = &self.avatar_url {
            body["avatar_url"] = serde_json::json!(avatar);
        }
        match &self.payload {
            WebhookPayload::Embed(embed) => {
                let mut card = serde_json::json!({
                    "title": embed.title,
                    "url": embed.url,
                    "color": EMBED_COLOR,
                });
                if let Some(description) = &embed.description {
                    card["description"] = serde_json::json!(description);
                }
                body["embeds"] = serde_json::json!([card]);
            }
            WebhookPayload::Templated(text) => {
                body["content"] = serde_json::json!(text.content);
            }
        }
        body
    }

    /// Short label for logs.
    pub fn summary(&self) -> &str {
        match &self.payload {
            WebhookPayload::Embed(embed) => &embed.title,
            WebhookPayload::Templated(text) => &text.content,
        }
    }
}

/// Sends a message to a destination URL.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// `true` only when the destination answered 2xx.
    async fn deliver(&self, url: &str, message: &WebhookMessage) -> bool;
}

/// HTTP webhook client.
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedhookError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &FeedhookConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.delivery_timeout_secs))
    }
}

#[async_trait]
impl Deliver for WebhookClient {
    async fn deliver(&self, url: &str, message: &WebhookMessage) -> bool {
        let resp = match self.client.post(url).json(&message.to_json()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("⚠️ Webhook send failed for '{}': {e}", message.summary());
                return false;
            }
        };

        let status = resp.status();
        if status.is_success() {
            tracing::info!("✅ Webhook message sent: {}", message.summary());
            true
        } else {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!("⚠️ Webhook error {status} for '{}': {body}", message.summary());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embed_message() -> WebhookMessage {
        WebhookMessage {
            username: "Example Blog".into(),
            avatar_url: Some("https://example.com/logo.png".into()),
            payload: WebhookPayload::Embed(EmbedPayload {
                title: "Hello".into(),
                url: "https://example.com/hello".into(),
                description: Some("First words".into()),
            }),
        }
    }

    #[test]
    fn test_embed_json_shape() {
        let json = embed_message().to_json();
        assert_eq!(json["username"], "Example Blog");
        assert_eq!(json["avatar_url"], "https://example.com/logo.png");
        assert_eq!(json["embeds"][0]["title"], "Hello");
        assert_eq!(json["embeds"][0]["url"], "https://example.com/hello");
        assert_eq!(json["embeds"][0]["description"], "First words");
        assert_eq!(json["embeds"][0]["color"], EMBED_COLOR);
        assert!(json.get("content").is_none());
    }

    #[test]
    fn test_templated_json_shape() {
        let msg = WebhookMessage {
            username: "Example Blog".into(),
            avatar_url: None,
            payload: WebhookPayload::Templated(TemplatedPayload::new("**Hello** https://example.com")),
        };
        let json = msg.to_json();
        assert_eq!(json["content"], "**Hello** https://example.com");
        assert!(json.get("embeds").is_none());
        assert!(json.get("avatar_url").is_none());
    }

    #[test]
    fn test_templated_content_capped() {
        let long = "z".repeat(MAX_CONTENT_CHARS + 50);
        let payload = TemplatedPayload::new(&long);
        assert_eq!(payload.content.chars().count(), MAX_CONTENT_CHARS);
        assert!(payload.content.ends_with("..."));
    }

    #[tokio::test]
    async fn test_unreachable_destination_is_false() {
        let client = WebhookClient::new(Duration::from_secs(2)).unwrap();
        let sent = client.deliver("http://127.0.0.1:1/webhook", &embed_message()).await;
        assert!(!sent);
    }
}
