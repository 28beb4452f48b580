//! # Feedhook Scheduler
//!
//! Polls syndication feeds per workspace and delivers new entries to
//! Discord-style webhooks.
//!
//! ## Architecture
//! ```text
//! WorkspaceScheduler (one tokio interval per workspace)
//!   └── tick → FeedChecker, one feed at a time
//!                ├── FeedSource  (HTTP GET + RSS/Atom parse)
//!                ├── FeedStore   (post ledger + watermarks, SQLite)
//!                └── Deliver     (webhook POST, embed or templated text)
//! ```
//!
//! Checks of one feed are serialized by `FeedChecker`, and the post
//! ledger's UNIQUE(feed_id, guid) records what was sent. Watermarks only
//! decide between delivery and backfill.

pub mod checker;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod reader;
pub mod registry;
pub mod template;

pub use checker::{EntryOutcome, FeedChecker, MessageFormat};
pub use dispatch::{Deliver, WebhookClient, WebhookMessage, WebhookPayload};
pub use engine::WorkspaceScheduler;
pub use persistence::{NewFeed, SqliteStore};
pub use reader::{FeedEntry, FeedSource, HttpFeedSource};
pub use registry::SchedulerRegistry;
