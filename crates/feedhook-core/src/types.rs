//! Persisted records shared between the store and the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a feed's new entries are posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDestination {
    pub url: String,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    /// Name of the webhook on the receiving side.
    pub name: Option<String>,
}

/// A configured syndication source plus its destination and template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    /// `None` only for rows created before workspaces existed.
    pub workspace_id: Option<i64>,
    pub name: String,
    pub url: String,
    pub profile_image: Option<String>,
    pub webhook: Option<WebhookDestination>,
    pub message_template: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    /// Most recent entry seen, delivered or not.
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_checked_title: Option<String>,
    /// Most recent entry actually delivered.
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_sent_title: Option<String>,
}

impl Feed {
    /// The destination, if one with a non-empty URL is configured.
    pub fn destination(&self) -> Option<&WebhookDestination> {
        self.webhook.as_ref().filter(|w| !w.url.trim().is_empty())
    }

    /// Enabled and wired to a destination.
    pub fn is_deliverable(&self) -> bool {
        self.enabled && self.destination().is_some()
    }

    /// The custom template, ignoring blank strings.
    pub fn template(&self) -> Option<&str> {
        self.message_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}

/// Delivery ledger entry. Unique per (feed_id, guid).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub sent_at: DateTime<Utc>,
}

/// Ledger row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Tenant boundary owning feeds and a polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Per-workspace settings row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    pub workspace_id: i64,
    /// Always within 1..=1440 once persisted.
    pub check_interval_minutes: u32,
    pub discord_client_id: Option<String>,
    #[serde(skip_serializing)]
    pub discord_client_secret: Option<String>,
}
