//! Record store trait — the scheduler's only shared state.
//!
//! Implementations must enforce uniqueness of (feed_id, guid) in the post
//! ledger so an entry is never recorded twice. Callers serialize checks of
//! the same feed; the store does not.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Feed, NewPost, Workspace, WorkspaceSettings};

/// Read/update interface over feeds, workspaces and the post ledger.
pub trait FeedStore: Send + Sync {
    /// Every known workspace.
    fn list_workspaces(&self) -> Result<Vec<Workspace>>;

    /// Settings row for a workspace, if one exists.
    fn workspace_settings(&self, workspace_id: i64) -> Result<Option<WorkspaceSettings>>;

    fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>>;

    /// All feeds owned by a workspace, enabled or not.
    fn list_feeds(&self, workspace_id: i64) -> Result<Vec<Feed>>;

    fn post_exists(&self, feed_id: i64, guid: &str) -> Result<bool>;

    /// Insert a ledger row without touching watermarks. Returns `false`
    /// when the (feed_id, guid) pair already exists; that is not an error.
    fn insert_post(&self, post: &NewPost) -> Result<bool>;

    /// Insert a ledger row for a delivered entry and advance the feed's
    /// sent watermark in one unit. The watermark pair moves to this post
    /// only when its `published_at` is at or after the current
    /// `last_sent_at`, so it never goes backwards. An undated post moves
    /// `last_sent_title` alone.
    /// Returns `false` (and leaves the watermark alone) on a duplicate.
    fn record_delivery(&self, post: &NewPost, sent_at: DateTime<Utc>) -> Result<bool>;

    /// Persist the checked watermark. When `seed_sent_at` is given and the
    /// feed has never delivered, `last_sent_at` is set to it as well.
    fn mark_checked(
        &self,
        feed_id: i64,
        checked_at: DateTime<Utc>,
        title: Option<&str>,
        seed_sent_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}
