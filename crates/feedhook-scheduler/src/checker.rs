//! Feed checker — fetch one feed, ledger what is new, deliver what is due.
//!
//! The post ledger is authoritative: an entry with a ledger row is never
//! delivered again, and a row is only written for a delivered entry after
//! the destination accepted it. Entries are handled in source order with
//! no assumption that the source is sorted by date.
//!
//! Checks of the same feed never overlap: each takes the feed's lock and
//! reloads the feed before reading its watermark.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use feedhook_core::error::{FeedhookError, Result};
use feedhook_core::traits::FeedStore;
use feedhook_core::types::{Feed, NewPost, WebhookDestination};

use crate::dispatch::{Deliver, EmbedPayload, TemplatedPayload, WebhookMessage, WebhookPayload};
use crate::reader::{FeedEntry, FeedSource};
use crate::template;

/// Rendered into the embed description when a feed has no template.
pub const DEFAULT_TEMPLATE: &str = "{content:200}";

/// Payload shape, resolved once per feed before entries are processed.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageFormat {
    Embed,
    Template(String),
}

impl MessageFormat {
    pub fn for_feed(feed: &Feed) -> Self {
        match feed.template() {
            Some(t) => MessageFormat::Template(t.to_string()),
            None => MessageFormat::Embed,
        }
    }

    /// Build the message for one entry. Caller guarantees title and link.
    pub fn message(&self, feed: &Feed, entry: &FeedEntry) -> WebhookMessage {
        let title = entry.title.clone().unwrap_or_default();
        let link = entry.link.clone().unwrap_or_default();
        let fields = entry.fields();
        let payload = match self {
            MessageFormat::Embed => {
                let description = template::render(DEFAULT_TEMPLATE, &fields);
                WebhookPayload::Embed(EmbedPayload {
                    title,
                    url: link,
                    description: (!description.is_empty()).then_some(description),
                })
            }
            MessageFormat::Template(t) => {
                let rendered = template::render(t, &fields);
                // Empty text is rejected by webhook endpoints.
                let content = if rendered.is_empty() {
                    format!("{title}\n{link}")
                } else {
                    rendered
                };
                WebhookPayload::Templated(TemplatedPayload::new(&content))
            }
        };
        WebhookMessage {
            username: feed.name.clone(),
            avatar_url: feed.profile_image.clone(),
            payload,
        }
    }
}

/// What happened to a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Missing key, title or link.
    Invalid,
    AlreadySeen,
    /// Ledgered without delivery.
    Backfilled,
    Delivered,
    /// Destination refused or was unreachable; retried next cycle.
    Failed,
}

/// Entries at or before the sent watermark, and everything on a feed that
/// has never delivered, are ledgered without being sent. An entry with no
/// publish date on a feed that has delivered before counts as new.
pub fn is_backfill(last_sent_at: Option<DateTime<Utc>>, published: Option<DateTime<Utc>>) -> bool {
    match (last_sent_at, published) {
        (None, _) => true,
        (Some(watermark), Some(published)) => published <= watermark,
        (Some(_), None) => false,
    }
}

/// Runs the check/dedup/deliver pipeline for one feed at a time.
pub struct FeedChecker {
    store: Arc<dyn FeedStore>,
    source: Arc<dyn FeedSource>,
    deliverer: Arc<dyn Deliver>,
    feed_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl FeedChecker {
    pub fn new(
        store: Arc<dyn FeedStore>,
        source: Arc<dyn FeedSource>,
        deliverer: Arc<dyn Deliver>,
    ) -> Self {
        Self {
            store,
            source,
            deliverer,
            feed_locks: Mutex::new(HashMap::new()),
        }
    }

    fn feed_lock(&self, feed_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.feed_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(feed_id).or_default().clone()
    }

    /// Check one feed and return how many entries were delivered.
    /// Never fails: fetch, parse and store errors are logged and the feed
    /// is skipped or partially processed for this cycle.
    pub async fn check_feed(&self, feed: &Feed) -> usize {
        if !feed.is_deliverable() {
            return 0;
        }

        let lock = self.feed_lock(feed.id);
        let _guard = lock.lock().await;

        // Another check may have moved the watermark while we waited.
        let feed = match self.store.get_feed(feed.id) {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                tracing::debug!("Feed '{}' was deleted before its check ran", feed.name);
                return 0;
            }
            Err(e) => {
                tracing::warn!("⚠️ Feed '{}': failed to reload before check: {e}", feed.name);
                return 0;
            }
        };
        self.check_feed_locked(&feed).await
    }

    async fn check_feed_locked(&self, feed: &Feed) -> usize {
        let destination = match feed.destination() {
            Some(d) if feed.enabled => d,
            _ => return 0,
        };

        let entries = match self.source.fetch(&feed.url).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("⚠️ Failed to check feed '{}': {e}", feed.name);
                return 0;
            }
        };

        let latest_title = entries.first().and_then(|e| e.title.clone());
        let format = MessageFormat::for_feed(feed);
        let mut delivered = 0;
        let mut backfilled = 0;
        let mut newest_seen: Option<DateTime<Utc>> = None;

        for entry in &entries {
            newest_seen = newest_seen.max(entry.published);
            match self.process_entry(feed, destination, &format, entry).await {
                Ok(EntryOutcome::Delivered) => delivered += 1,
                Ok(EntryOutcome::Backfilled) => backfilled += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Feed '{}': failed to record entry {:?}: {e}",
                        feed.name,
                        entry.dedup_key()
                    );
                }
            }
        }

        let now = Utc::now();
        // A feed that has never delivered starts its sent watermark at the
        // newest entry it has now ledgered, so the next cycle can deliver.
        let seed = feed
            .last_sent_at
            .is_none()
            .then(|| newest_seen.map_or(now, |newest| newest.min(now)));
        if let Err(e) = self
            .store
            .mark_checked(feed.id, now, latest_title.as_deref(), seed)
        {
            tracing::warn!("⚠️ Feed '{}': failed to save check watermark: {e}", feed.name);
        }

        tracing::debug!(
            "Feed '{}': {} entries, {delivered} delivered, {backfilled} backfilled",
            feed.name,
            entries.len()
        );
        delivered
    }

    async fn process_entry(
        &self,
        feed: &Feed,
        destination: &WebhookDestination,
        format: &MessageFormat,
        entry: &FeedEntry,
    ) -> Result<EntryOutcome> {
        let (Some(key), Some(title), Some(link)) =
            (entry.dedup_key(), entry.title.as_deref(), entry.link.as_deref())
        else {
            return Ok(EntryOutcome::Invalid);
        };

        if self.store.post_exists(feed.id, key)? {
            return Ok(EntryOutcome::AlreadySeen);
        }

        let post = NewPost {
            feed_id: feed.id,
            guid: key.to_string(),
            title: title.to_string(),
            link: link.to_string(),
            published_at: entry.published,
        };

        // Compared against the watermark as loaded, not as advanced during
        // this pass, so an older unsent entry listed after a newer one is
        // still delivered.
        if is_backfill(feed.last_sent_at, entry.published) {
            self.store.insert_post(&post)?;
            tracing::debug!("Feed '{}': backfilled '{title}'", feed.name);
            return Ok(EntryOutcome::Backfilled);
        }

        let message = format.message(feed, entry);
        if !self.deliverer.deliver(&destination.url, &message).await {
            return Ok(EntryOutcome::Failed);
        }

        if !self.store.record_delivery(&post, Utc::now())? {
            tracing::debug!("Feed '{}': '{title}' was ledgered concurrently", feed.name);
        }
        Ok(EntryOutcome::Delivered)
    }

    /// Send the newest entry to the destination regardless of the ledger.
    /// Writes nothing. Returns the title that was sent.
    pub async fn test_feed(&self, feed: &Feed) -> Result<String> {
        let destination = feed.destination().ok_or_else(|| {
            FeedhookError::Validation(format!("Feed '{}' has no webhook destination", feed.name))
        })?;

        let lock = self.feed_lock(feed.id);
        let _guard = lock.lock().await;

        let entries = self.source.fetch(&feed.url).await?;
        let entry = entries
            .first()
            .filter(|e| e.title.is_some() && e.link.is_some())
            .ok_or_else(|| FeedhookError::Feed(format!("No valid items found in {}", feed.url)))?;

        let message = MessageFormat::for_feed(feed).message(feed, entry);
        if self.deliverer.deliver(&destination.url, &message).await {
            Ok(entry.title.clone().unwrap_or_default())
        } else {
            Err(FeedhookError::Delivery(format!(
                "Webhook for feed '{}' did not accept the test message",
                feed.name
            )))
        }
    }

    /// Build the message the newest valid entry would produce, without
    /// sending it. Works for disabled or unconnected feeds too.
    pub async fn preview_feed(&self, feed: &Feed) -> Result<Option<WebhookMessage>> {
        let entries = self.source.fetch(&feed.url).await?;
        let format = MessageFormat::for_feed(feed);
        Ok(entries
            .iter()
            .find(|e| e.dedup_key().is_some() && e.title.is_some() && e.link.is_some())
            .map(|entry| format.message(feed, entry)))
    }
}
