//! Scheduler Engine — one recurring timer per workspace.
//! Each timer sleeps a full interval, then checks the workspace's feeds
//! one at a time. Timers are tokio tasks; nothing runs while idle.

use std::sync::Arc;
use std::time::Duration;

use feedhook_core::config::{self, FeedhookConfig};
use feedhook_core::error::Result;
use feedhook_core::traits::FeedStore;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::checker::FeedChecker;
use crate::registry::{ScheduleHandle, SchedulerRegistry};

/// Owns the per-workspace timers and the operator triggers.
pub struct WorkspaceScheduler {
    store: Arc<dyn FeedStore>,
    checker: Arc<FeedChecker>,
    registry: SchedulerRegistry,
    default_interval: u32,
}

impl WorkspaceScheduler {
    pub fn new(store: Arc<dyn FeedStore>, checker: Arc<FeedChecker>, config: &FeedhookConfig) -> Self {
        Self {
            store,
            checker,
            registry: SchedulerRegistry::new(),
            default_interval: config.effective_default_interval(),
        }
    }

    pub fn registry(&self) -> &SchedulerRegistry {
        &self.registry
    }

    /// Configured interval in minutes, falling back to the default when
    /// settings are missing or unreadable.
    pub fn interval_for(&self, workspace_id: i64) -> u32 {
        match self.store.workspace_settings(workspace_id) {
            Ok(Some(settings)) => config::clamp_interval(settings.check_interval_minutes),
            Ok(None) => self.default_interval,
            Err(e) => {
                tracing::warn!(
                    "⚠️ Workspace {workspace_id}: failed to read settings, using {} min: {e}",
                    self.default_interval
                );
                self.default_interval
            }
        }
    }

    /// Install a fresh timer for the workspace, replacing any existing one.
    /// Returns the interval in minutes.
    pub fn start(&self, workspace_id: i64) -> u32 {
        let minutes = self.interval_for(workspace_id);
        let period = Duration::from_secs(u64::from(minutes) * 60);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run_timer(
            self.store.clone(),
            self.checker.clone(),
            workspace_id,
            period,
            stop_rx,
        ));
        self.registry
            .replace(ScheduleHandle::new(workspace_id, minutes, stop_tx, task));

        tracing::info!("⏰ Workspace {workspace_id}: checking feeds every {minutes} min");
        minutes
    }

    /// Re-read the interval and reinstall the timer.
    pub fn restart(&self, workspace_id: i64) -> u32 {
        self.start(workspace_id)
    }

    /// Cancel the workspace's timer. Returns `false` if none was running.
    pub fn stop(&self, workspace_id: i64) -> bool {
        let stopped = self.registry.remove(workspace_id);
        if stopped {
            tracing::info!("⏹️ Workspace {workspace_id}: scheduler stopped");
        }
        stopped
    }

    /// Start a timer for every workspace. Returns how many were started.
    pub fn start_all(&self) -> Result<usize> {
        let workspaces = self.store.list_workspaces()?;
        for workspace in &workspaces {
            self.start(workspace.id);
        }
        tracing::info!("⏰ Scheduler started for {} workspace(s)", workspaces.len());
        Ok(workspaces.len())
    }

    /// Cancel every timer.
    pub fn stop_all(&self) -> usize {
        let ids = self.registry.workspace_ids();
        let count = self.registry.clear();
        tracing::info!("⏹️ Stopped {count} workspace scheduler(s): {ids:?}");
        count
    }

    /// One pass over the workspace's feeds, outside the timer.
    pub async fn check_all_feeds_in_workspace(&self, workspace_id: i64) -> Result<usize> {
        check_workspace(&*self.store, &self.checker, workspace_id, None).await
    }

    /// One pass over every workspace. A workspace whose feeds cannot be
    /// listed is logged and skipped.
    pub async fn check_all_feeds(&self) -> Result<usize> {
        let mut total = 0;
        for workspace in self.store.list_workspaces()? {
            match self.check_all_feeds_in_workspace(workspace.id).await {
                Ok(n) => total += n,
                Err(e) => tracing::warn!("⚠️ Workspace '{}': check failed: {e}", workspace.name),
            }
        }
        Ok(total)
    }

    pub fn on_workspace_created(&self, workspace_id: i64) -> u32 {
        self.start(workspace_id)
    }

    pub fn on_workspace_deleted(&self, workspace_id: i64) -> bool {
        self.stop(workspace_id)
    }
}

/// Timer loop. The first tick fires one period after start; missed ticks
/// are dropped rather than replayed.
async fn run_timer(
    store: Arc<dyn FeedStore>,
    checker: Arc<FeedChecker>,
    workspace_id: i64,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }

        match check_workspace(&*store, &checker, workspace_id, Some(&stop_rx)).await {
            Ok(n) => tracing::info!("📣 Workspace {workspace_id}: {n} new post(s) delivered"),
            Err(e) => tracing::warn!("⚠️ Workspace {workspace_id}: tick failed: {e}"),
        }
    }

    tracing::debug!("Workspace {workspace_id}: timer loop exited");
}

/// Check each enabled, connected feed in turn. With a stop signal, the
/// pass ends after the feed in progress once the signal is raised.
async fn check_workspace(
    store: &dyn FeedStore,
    checker: &FeedChecker,
    workspace_id: i64,
    stop_rx: Option<&watch::Receiver<bool>>,
) -> Result<usize> {
    let feeds = store.list_feeds(workspace_id)?;
    let mut delivered = 0;
    for feed in feeds.iter().filter(|f| f.is_deliverable()) {
        if stop_rx.is_some_and(|rx| *rx.borrow()) {
            tracing::debug!("Workspace {workspace_id}: stop requested, ending pass early");
            break;
        }
        delivered += checker.check_feed(feed).await;
    }
    Ok(delivered)
}
