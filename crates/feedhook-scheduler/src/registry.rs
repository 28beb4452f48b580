//! Schedule registry — at most one live timer per workspace.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A running per-workspace timer.
pub struct ScheduleHandle {
    pub workspace_id: i64,
    pub interval_minutes: u32,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    pub fn new(
        workspace_id: i64,
        interval_minutes: u32,
        stop_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            workspace_id,
            interval_minutes,
            stop_tx,
            task,
        }
    }

    /// Signal the loop to exit. A tick in progress finishes its current
    /// feed first; an idle loop exits immediately.
    pub fn cancel(self) {
        if self.task.is_finished() {
            // Only a panic ends the loop without a stop signal.
            tracing::warn!("⚠️ Timer for workspace {} had already exited", self.workspace_id);
            return;
        }
        let _ = self.stop_tx.send(true);
        tracing::debug!("Timer for workspace {} cancelled", self.workspace_id);
    }
}

/// Workspace id → active timer.
#[derive(Default)]
pub struct SchedulerRegistry {
    handles: Mutex<HashMap<i64, ScheduleHandle>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, ScheduleHandle>> {
        // A poisoned map is still structurally valid.
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install `handle`, cancelling whatever timer the workspace had.
    /// Both happen under one lock so two timers never coexist.
    pub fn replace(&self, handle: ScheduleHandle) {
        let mut handles = self.lock();
        if let Some(previous) = handles.insert(handle.workspace_id, handle) {
            previous.cancel();
        }
    }

    /// Cancel and forget a workspace's timer. Returns whether one existed.
    pub fn remove(&self, workspace_id: i64) -> bool {
        match self.lock().remove(&workspace_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn interval(&self, workspace_id: i64) -> Option<u32> {
        self.lock().get(&workspace_id).map(|h| h.interval_minutes)
    }

    pub fn contains(&self, workspace_id: i64) -> bool {
        self.lock().contains_key(&workspace_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn workspace_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cancel every timer. Returns how many were running.
    pub fn clear(&self) -> usize {
        let drained: Vec<ScheduleHandle> = self.lock().drain().map(|(_, h)| h).collect();
        let count = drained.len();
        for handle in drained {
            handle.cancel();
        }
        count
    }
}
