//! SQLite-backed record store for workspaces, feeds and the post ledger.
//! Survives restarts; the ledger's UNIQUE(feed_id, guid) is the dedup guard.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use feedhook_core::config::{self, FeedhookConfig};
use feedhook_core::error::{FeedhookError, Result};
use feedhook_core::traits::FeedStore;
use feedhook_core::types::{Feed, NewPost, Post, WebhookDestination, Workspace, WorkspaceSettings};
use rusqlite::{Connection, OptionalExtension, params};

/// Shared SELECT column list for feed queries.
const FEED_SELECT: &str = "SELECT id, workspace_id, name, url, profile_image, webhook_url, webhook_channel_id, webhook_guild_id, webhook_name, message_template, enabled, created_at, last_checked_at, last_checked_title, last_sent_at, last_sent_title FROM feeds";

/// Map a database row to a Feed.
fn row_to_feed(row: &rusqlite::Row) -> rusqlite::Result<Feed> {
    let webhook_url: Option<String> = row.get(5)?;
    let webhook = webhook_url.map(|url| -> rusqlite::Result<WebhookDestination> {
        Ok(WebhookDestination {
            url,
            channel_id: row.get(6)?,
            guild_id: row.get(7)?,
            name: row.get(8)?,
        })
    });
    Ok(Feed {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        profile_image: row.get(4)?,
        webhook: webhook.transpose()?,
        message_template: row.get(9)?,
        enabled: row.get::<_, i64>(10)? != 0,
        created_at: parse_ts(row.get(11)?).unwrap_or_else(Utc::now),
        last_checked_at: parse_ts(row.get(12)?),
        last_checked_title: row.get(13)?,
        last_sent_at: parse_ts(row.get(14)?),
        last_sent_title: row.get(15)?,
    })
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> FeedhookError + '_ {
    move |e| FeedhookError::Database(format!("{context}: {e}"))
}

/// Feed as created by the management side.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub workspace_id: Option<i64>,
    pub name: String,
    pub url: String,
    pub profile_image: Option<String>,
    pub webhook: Option<WebhookDestination>,
    pub message_template: Option<String>,
    pub enabled: bool,
}

impl NewFeed {
    /// An enabled feed posting to `webhook_url`.
    pub fn with_webhook(workspace_id: i64, name: &str, url: &str, webhook_url: &str) -> Self {
        Self {
            workspace_id: Some(workspace_id),
            name: name.to_string(),
            url: url.to_string(),
            webhook: Some(WebhookDestination {
                url: webhook_url.to_string(),
                channel_id: None,
                guild_id: None,
                name: None,
            }),
            enabled: true,
            ..Default::default()
        }
    }
}

/// SQLite record store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_err("DB pragma"))?;
        Self::init(conn)
    }

    /// Private in-memory database, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err("DB pragma"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FeedhookError::Database("connection lock poisoned".into()))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workspaces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workspace_settings (
                workspace_id INTEGER PRIMARY KEY REFERENCES workspaces(id) ON DELETE CASCADE,
                check_interval_minutes INTEGER NOT NULL DEFAULT 10
                    CHECK (check_interval_minutes BETWEEN 1 AND 1440),
                discord_client_id TEXT,
                discord_client_secret TEXT
            );

            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER REFERENCES workspaces(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                profile_image TEXT,
                webhook_url TEXT,
                webhook_channel_id TEXT,
                webhook_guild_id TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_checked_at TEXT
            );

            -- Delivery ledger: one row per (feed, guid) ever observed
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                published_at TEXT,
                sent_at TEXT NOT NULL,
                UNIQUE(feed_id, guid)
            );

            CREATE INDEX IF NOT EXISTS idx_posts_feed_id ON posts(feed_id);
            CREATE INDEX IF NOT EXISTS idx_feeds_workspace_id ON feeds(workspace_id);
         ",
        )
        .map_err(db_err("Migration"))?;

        // Columns added after the first release (safe to fail if already exist)
        for column in [
            "webhook_name TEXT",
            "message_template TEXT",
            "last_checked_title TEXT",
            "last_sent_at TEXT",
            "last_sent_title TEXT",
        ] {
            let _ = conn.execute(&format!("ALTER TABLE feeds ADD COLUMN {column}"), []);
        }

        Ok(())
    }

    // ─── Workspaces ──────────────────────────────────────

    /// Create a workspace together with its default settings row.
    pub fn create_workspace(&self, name: &str) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Create workspace"))?;
        tx.execute(
            "INSERT INTO workspaces (name, created_at) VALUES (?1, ?2)",
            params![name, ts(Utc::now())],
        )
        .map_err(db_err("Create workspace"))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO workspace_settings (workspace_id, check_interval_minutes) VALUES (?1, ?2)",
            params![id, FeedhookConfig::default().default_interval_minutes],
        )
        .map_err(db_err("Create workspace settings"))?;
        tx.commit().map_err(db_err("Create workspace"))?;
        Ok(id)
    }

    /// Delete a workspace; its settings, feeds and posts cascade.
    pub fn delete_workspace(&self, workspace_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM workspaces WHERE id = ?1", [workspace_id])
            .map_err(db_err("Delete workspace"))?;
        Ok(n > 0)
    }

    /// Store a new polling interval. Values outside 1..=1440 are rejected.
    pub fn set_check_interval(&self, workspace_id: i64, minutes: u32) -> Result<()> {
        let minutes = config::validate_interval(minutes)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO workspace_settings (workspace_id, check_interval_minutes) VALUES (?1, ?2)
             ON CONFLICT(workspace_id) DO UPDATE SET check_interval_minutes = excluded.check_interval_minutes",
            params![workspace_id, minutes],
        )
        .map_err(db_err("Set check interval"))?;
        Ok(())
    }

    // ─── Feeds ──────────────────────────────────────

    pub fn create_feed(&self, feed: &NewFeed) -> Result<i64> {
        let webhook = feed.webhook.as_ref();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO feeds
             (workspace_id, name, url, profile_image, webhook_url, webhook_channel_id,
              webhook_guild_id, webhook_name, message_template, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                feed.workspace_id,
                feed.name,
                feed.url,
                feed.profile_image,
                webhook.map(|w| &w.url),
                webhook.and_then(|w| w.channel_id.as_ref()),
                webhook.and_then(|w| w.guild_id.as_ref()),
                webhook.and_then(|w| w.name.as_ref()),
                feed.message_template,
                feed.enabled as i32,
                ts(Utc::now()),
            ],
        )
        .map_err(db_err("Create feed"))?;
        Ok(conn.last_insert_rowid())
    }

    /// Like [`FeedStore::get_feed`], but a missing feed is an error.
    pub fn require_feed(&self, feed_id: i64) -> Result<Feed> {
        self.get_feed(feed_id)?
            .ok_or_else(|| FeedhookError::NotFound(format!("feed {feed_id}")))
    }

    pub fn set_feed_enabled(&self, feed_id: i64, enabled: bool) -> Result<()> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE feeds SET enabled = ?2 WHERE id = ?1",
                params![feed_id, enabled as i32],
            )
            .map_err(db_err("Update feed"))?;
        if n == 0 {
            return Err(FeedhookError::NotFound(format!("feed {feed_id}")));
        }
        Ok(())
    }

    /// Delete a feed; its posts cascade.
    pub fn delete_feed(&self, feed_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM feeds WHERE id = ?1", [feed_id])
            .map_err(db_err("Delete feed"))?;
        Ok(n > 0)
    }

    // ─── Posts ──────────────────────────────────────

    /// Ledger rows for a feed, oldest first.
    pub fn list_posts(&self, feed_id: i64) -> Result<Vec<Post>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, feed_id, guid, title, link, published_at, sent_at
                 FROM posts WHERE feed_id = ?1 ORDER BY id",
            )
            .map_err(db_err("List posts"))?;
        let rows = stmt
            .query_map([feed_id], |row| {
                Ok(Post {
                    id: row.get(0)?,
                    feed_id: row.get(1)?,
                    guid: row.get(2)?,
                    title: row.get(3)?,
                    link: row.get(4)?,
                    published_at: parse_ts(row.get(5)?),
                    sent_at: parse_ts(row.get(6)?).unwrap_or_else(Utc::now),
                })
            })
            .map_err(db_err("List posts"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("List posts"))
    }
}

fn insert_post_row(conn: &Connection, post: &NewPost, sent_at: DateTime<Utc>) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO posts (feed_id, guid, title, link, published_at, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            post.feed_id,
            post.guid,
            post.title,
            post.link,
            post.published_at.map(ts),
            ts(sent_at),
        ],
    )?;
    Ok(n > 0)
}

impl FeedStore for SqliteStore {
    fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name, created_at FROM workspaces ORDER BY id")
            .map_err(db_err("List workspaces"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Workspace {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_ts(row.get(2)?).unwrap_or_else(Utc::now),
                })
            })
            .map_err(db_err("List workspaces"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("List workspaces"))
    }

    fn workspace_settings(&self, workspace_id: i64) -> Result<Option<WorkspaceSettings>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT workspace_id, check_interval_minutes, discord_client_id, discord_client_secret
             FROM workspace_settings WHERE workspace_id = ?1",
            [workspace_id],
            |row| {
                Ok(WorkspaceSettings {
                    workspace_id: row.get(0)?,
                    check_interval_minutes: row.get(1)?,
                    discord_client_id: row.get(2)?,
                    discord_client_secret: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(db_err("Load workspace settings"))
    }

    fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{FEED_SELECT} WHERE id = ?1"), [feed_id], row_to_feed)
            .optional()
            .map_err(db_err("Load feed"))
    }

    fn list_feeds(&self, workspace_id: i64) -> Result<Vec<Feed>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{FEED_SELECT} WHERE workspace_id = ?1 ORDER BY id"))
            .map_err(db_err("List feeds"))?;
        let rows = stmt
            .query_map([workspace_id], row_to_feed)
            .map_err(db_err("List feeds"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("List feeds"))
    }

    fn post_exists(&self, feed_id: i64, guid: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM posts WHERE feed_id = ?1 AND guid = ?2",
                params![feed_id, guid],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Check post"))?;
        Ok(found.is_some())
    }

    fn insert_post(&self, post: &NewPost) -> Result<bool> {
        let conn = self.conn()?;
        insert_post_row(&conn, post, Utc::now()).map_err(db_err("Insert post"))
    }

    fn record_delivery(&self, post: &NewPost, sent_at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Record delivery"))?;
        let inserted = insert_post_row(&tx, post, sent_at).map_err(db_err("Record delivery"))?;

        match post.published_at {
            _ if !inserted => {}
            Some(published) => {
                let current: Option<String> = tx
                    .query_row(
                        "SELECT last_sent_at FROM feeds WHERE id = ?1",
                        [post.feed_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(db_err("Record delivery"))?
                    .flatten();
                if parse_ts(current).is_none_or(|watermark| published >= watermark) {
                    tx.execute(
                        "UPDATE feeds SET last_sent_at = ?2, last_sent_title = ?3 WHERE id = ?1",
                        params![post.feed_id, ts(published), post.title],
                    )
                    .map_err(db_err("Record delivery"))?;
                }
            }
            // No time to compare: only the title moves.
            None => {
                tx.execute(
                    "UPDATE feeds SET last_sent_title = ?2 WHERE id = ?1",
                    params![post.feed_id, post.title],
                )
                .map_err(db_err("Record delivery"))?;
            }
        }

        tx.commit().map_err(db_err("Record delivery"))?;
        Ok(inserted)
    }

    fn mark_checked(
        &self,
        feed_id: i64,
        checked_at: DateTime<Utc>,
        title: Option<&str>,
        seed_sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET last_checked_at = ?2, last_checked_title = ?3,
                 last_sent_at = COALESCE(last_sent_at, ?4)
             WHERE id = ?1",
            params![feed_id, ts(checked_at), title, seed_sent_at.map(ts)],
        )
        .map_err(db_err("Mark checked"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with_feed() -> (SqliteStore, i64, i64) {
        let store = SqliteStore::open_in_memory().unwrap();
        let ws = store.create_workspace("Team").unwrap();
        let feed = store
            .create_feed(&NewFeed::with_webhook(
                ws,
                "Example",
                "https://example.com/feed.xml",
                "https://hooks.example.com/1",
            ))
            .unwrap();
        (store, ws, feed)
    }

    fn post(feed_id: i64, guid: &str, published_at: Option<DateTime<Utc>>) -> NewPost {
        NewPost {
            feed_id,
            guid: guid.into(),
            title: format!("Title {guid}"),
            link: format!("https://example.com/{guid}"),
            published_at,
        }
    }

    #[test]
    fn test_open_and_migrate_file() {
        let dir = std::env::temp_dir().join("feedhook-store-test");
        std::fs::remove_dir_all(&dir).ok();
        let path = dir.join("nested").join("test.db");
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.list_workspaces().unwrap().is_empty());
        drop(store);
        // Reopening runs the migrations again without error.
        assert!(SqliteStore::open(&path).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_workspace_gets_default_settings() {
        let (store, ws, _) = store_with_feed();
        let settings = store.workspace_settings(ws).unwrap().unwrap();
        assert_eq!(settings.check_interval_minutes, 10);
        assert!(store.workspace_settings(ws + 100).unwrap().is_none());
    }

    #[test]
    fn test_interval_validation() {
        let (store, ws, _) = store_with_feed();
        assert!(matches!(store.set_check_interval(ws, 0), Err(FeedhookError::Validation(_))));
        assert!(matches!(store.set_check_interval(ws, 1500), Err(FeedhookError::Validation(_))));
        store.set_check_interval(ws, 45).unwrap();
        assert_eq!(store.workspace_settings(ws).unwrap().unwrap().check_interval_minutes, 45);
    }

    #[test]
    fn test_feed_round_trip() {
        let (store, ws, feed_id) = store_with_feed();
        let feed = store.get_feed(feed_id).unwrap().unwrap();
        assert_eq!(feed.workspace_id, Some(ws));
        assert_eq!(feed.destination().unwrap().url, "https://hooks.example.com/1");
        assert!(feed.enabled);
        assert!(feed.last_sent_at.is_none());
        assert_eq!(store.list_feeds(ws).unwrap().len(), 1);
    }

    #[test]
    fn test_feed_url_is_unique() {
        let (store, ws, _) = store_with_feed();
        let dup = NewFeed::with_webhook(ws, "Again", "https://example.com/feed.xml", "https://h/2");
        assert!(matches!(store.create_feed(&dup), Err(FeedhookError::Database(_))));
    }

    #[test]
    fn test_insert_post_ignores_duplicates() {
        let (store, _, feed_id) = store_with_feed();
        assert!(store.insert_post(&post(feed_id, "a", None)).unwrap());
        assert!(!store.insert_post(&post(feed_id, "a", None)).unwrap());
        assert!(store.post_exists(feed_id, "a").unwrap());
        assert!(!store.post_exists(feed_id, "b").unwrap());
        assert_eq!(store.list_posts(feed_id).unwrap().len(), 1);
    }

    #[test]
    fn test_record_delivery_moves_watermark_forward_only() {
        let (store, _, feed_id) = store_with_feed();
        let newer = Utc::now() - Duration::hours(1);
        let older = Utc::now() - Duration::hours(5);

        assert!(store.record_delivery(&post(feed_id, "new", Some(newer)), Utc::now()).unwrap());
        assert!(store.record_delivery(&post(feed_id, "old", Some(older)), Utc::now()).unwrap());

        let feed = store.get_feed(feed_id).unwrap().unwrap();
        assert_eq!(feed.last_sent_at, Some(newer));
        assert_eq!(feed.last_sent_title.as_deref(), Some("Title new"));
    }

    #[test]
    fn test_undated_delivery_moves_title_only() {
        let (store, _, feed_id) = store_with_feed();
        let newer = Utc::now() - Duration::hours(1);
        store.record_delivery(&post(feed_id, "new", Some(newer)), Utc::now()).unwrap();
        assert!(store.record_delivery(&post(feed_id, "undated", None), Utc::now()).unwrap());

        let feed = store.get_feed(feed_id).unwrap().unwrap();
        assert_eq!(feed.last_sent_at, Some(newer));
        assert_eq!(feed.last_sent_title.as_deref(), Some("Title undated"));

        // A duplicate changes nothing.
        assert!(!store.record_delivery(&post(feed_id, "new", Some(newer)), Utc::now()).unwrap());
        let feed = store.get_feed(feed_id).unwrap().unwrap();
        assert_eq!(feed.last_sent_title.as_deref(), Some("Title undated"));
    }

    #[test]
    fn test_record_delivery_duplicate_leaves_watermark() {
        let (store, _, feed_id) = store_with_feed();
        let first = Utc::now() - Duration::hours(3);
        store.insert_post(&post(feed_id, "a", Some(first))).unwrap();

        let inserted = store
            .record_delivery(&post(feed_id, "a", Some(Utc::now())), Utc::now())
            .unwrap();
        assert!(!inserted);
        assert!(store.get_feed(feed_id).unwrap().unwrap().last_sent_at.is_none());
    }

    #[test]
    fn test_mark_checked_seeds_only_empty_watermark() {
        let (store, _, feed_id) = store_with_feed();
        let seed = Utc::now() - Duration::hours(2);
        store.mark_checked(feed_id, Utc::now(), Some("Latest"), Some(seed)).unwrap();
        store.mark_checked(feed_id, Utc::now(), None, Some(Utc::now())).unwrap();

        let feed = store.get_feed(feed_id).unwrap().unwrap();
        assert_eq!(feed.last_sent_at, Some(seed));
        assert!(feed.last_checked_at.is_some());
        assert!(feed.last_checked_title.is_none());
    }

    #[test]
    fn test_delete_cascades() {
        let (store, ws, feed_id) = store_with_feed();
        store.insert_post(&post(feed_id, "a", None)).unwrap();

        assert!(store.delete_workspace(ws).unwrap());
        assert!(store.get_feed(feed_id).unwrap().is_none());
        assert!(store.list_posts(feed_id).unwrap().is_empty());
        assert!(store.workspace_settings(ws).unwrap().is_none());
        assert!(!store.delete_workspace(ws).unwrap());
    }

    #[test]
    fn test_disable_feed() {
        let (store, _, feed_id) = store_with_feed();
        store.set_feed_enabled(feed_id, false).unwrap();
        assert!(!store.get_feed(feed_id).unwrap().unwrap().enabled);
        assert!(store.delete_feed(feed_id).unwrap());
        assert!(matches!(
            store.set_feed_enabled(feed_id, true),
            Err(FeedhookError::NotFound(_))
        ));
    }

    #[test]
    fn test_require_feed() {
        let (store, _, feed_id) = store_with_feed();
        assert_eq!(store.require_feed(feed_id).unwrap().name, "Example");
        let err = store.require_feed(feed_id + 1).unwrap_err();
        assert!(matches!(err, FeedhookError::NotFound(_)));
        assert_eq!(err.to_string(), format!("Not found: feed {}", feed_id + 1));
    }
}
