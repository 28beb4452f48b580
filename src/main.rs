//! # Feedhook — feed-to-webhook scheduler
//!
//! Polls each workspace's RSS/Atom feeds on its own interval and posts
//! new entries to the feed's webhook.
//!
//! Usage:
//!   feedhook run                         # Start every workspace timer
//!   feedhook check --workspace 3         # One pass over a workspace
//!   feedhook test-feed 12                # Send the newest entry of feed 12
//!   feedhook preview 12                  # Print what would be sent

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedhook_core::config::FeedhookConfig;
use feedhook_core::types::Feed;
use feedhook_scheduler::{FeedChecker, HttpFeedSource, SqliteStore, WebhookClient, WorkspaceScheduler};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "feedhook",
    version,
    about = "📡 Feedhook — deliver RSS/Atom entries to webhooks"
)]
struct Cli {
    /// Config file (default: ~/.feedhook/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides config and FEEDHOOK_DB
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Check feeds once and exit
    Check {
        /// Only this workspace
        #[arg(long, conflicts_with = "feed")]
        workspace: Option<i64>,
        /// Only this feed
        #[arg(long)]
        feed: Option<i64>,
    },
    /// Send a feed's newest entry to its webhook, ignoring history
    TestFeed { id: i64 },
    /// Print the message a feed's newest entry would produce
    Preview { id: i64 },
}

struct App {
    store: Arc<SqliteStore>,
    checker: Arc<FeedChecker>,
    scheduler: WorkspaceScheduler,
}

impl App {
    fn open(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => FeedhookConfig::load_from(path)?,
            None => FeedhookConfig::load()?,
        };
        let db_path = cli
            .db
            .clone()
            .unwrap_or_else(|| config.resolved_database_path());
        let store = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("opening database {}", db_path.display()))?,
        );
        tracing::debug!("Database: {}", db_path.display());

        let source = Arc::new(HttpFeedSource::from_config(&config)?);
        let deliverer = Arc::new(WebhookClient::from_config(&config)?);
        let checker = Arc::new(FeedChecker::new(store.clone(), source, deliverer));
        let scheduler = WorkspaceScheduler::new(store.clone(), checker.clone(), &config);
        Ok(Self {
            store,
            checker,
            scheduler,
        })
    }

    fn feed(&self, id: i64) -> Result<Feed> {
        Ok(self.store.require_feed(id)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "feedhook=debug" } else { "feedhook=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let app = App::open(&cli)?;

    match cli.command {
        Command::Run => {
            println!("📡 Feedhook v{}", env!("CARGO_PKG_VERSION"));
            let started = app.scheduler.start_all()?;
            println!("   Workspaces scheduled: {started}");
            println!("   Press Ctrl-C to stop\n");

            tokio::signal::ctrl_c().await?;
            tracing::info!("🛑 Shutting down");
            app.scheduler.stop_all();
        }
        Command::Check { workspace, feed } => {
            let delivered = match (workspace, feed) {
                (_, Some(id)) => app.checker.check_feed(&app.feed(id)?).await,
                (Some(id), None) => app.scheduler.check_all_feeds_in_workspace(id).await?,
                (None, None) => app.scheduler.check_all_feeds().await?,
            };
            println!("✅ {delivered} new post(s) delivered");
        }
        Command::TestFeed { id } => {
            let feed = app.feed(id)?;
            let title = app.checker.test_feed(&feed).await?;
            println!("✅ Sent '{title}' to the webhook of '{}'", feed.name);
        }
        Command::Preview { id } => {
            let feed = app.feed(id)?;
            match app.checker.preview_feed(&feed).await? {
                Some(message) => println!("{}", serde_json::to_string_pretty(&message.to_json())?),
                None => println!("⚠️  No valid entries in {}", feed.url),
            }
        }
    }

    Ok(())
}
