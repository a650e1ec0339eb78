//! Live task registry.
//!
//! Maps task ids to their `TaskStatus` behind per-task locks. Readers
//! get cloned snapshots, so counters are never observed torn. Terminal
//! tasks are retained for a bounded window and then swept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use farmhand_core::types::{TaskState, TaskStatus};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::StoreError;

/// Default retention for terminal tasks.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
/// How often the background sweeper wakes up.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// In-memory registry of live tasks.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<Mutex<TaskStatus>>>>,
    retention: Duration,
}

impl TaskRegistry {
    /// Create a registry with the default 24 h retention.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a registry with a custom terminal-task retention window.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Register a fresh pending task.
    pub async fn create(&self, task_id: &str, session_id: &str, total_files: usize) {
        let status = TaskStatus::new(task_id, session_id, total_files);
        let mut tasks = self.tasks.write().await;
        tasks.insert(task_id.to_string(), Arc::new(Mutex::new(status)));
        debug!(task_id, session_id, total_files, "task registered");
    }

    /// Snapshot a task's status; None when unknown or already swept.
    pub async fn get(&self, task_id: &str) -> Option<TaskStatus> {
        let handle = {
            let tasks = self.tasks.read().await;
            tasks.get(task_id)?.clone()
        };
        let status = handle.lock().await;
        Some(status.clone())
    }

    /// Snapshot every known task, newest first.
    pub async fn list(&self) -> Vec<TaskStatus> {
        let handles: Vec<Arc<Mutex<TaskStatus>>> = {
            let tasks = self.tasks.read().await;
            tasks.values().cloned().collect()
        };
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.lock().await.clone());
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Mutate a task under its lock. The closure sees the live record;
    /// readers never observe the intermediate state.
    pub async fn mutate<F>(&self, task_id: &str, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TaskStatus),
    {
        let handle = {
            let tasks = self.tasks.read().await;
            tasks
                .get(task_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?
        };
        let mut status = handle.lock().await;
        mutate(&mut status);
        Ok(())
    }

    /// Remove terminal tasks older than `max_age`; returns the number
    /// swept.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut expired = Vec::new();
        {
            let tasks = self.tasks.read().await;
            for (id, handle) in tasks.iter() {
                let status = handle.lock().await;
                let done_at = match (status.status, status.completed_at) {
                    (state, Some(at)) if state.is_terminal() => at,
                    _ => continue,
                };
                if done_at < cutoff {
                    expired.push(id.clone());
                }
            }
        }
        if expired.is_empty() {
            return 0;
        }

        let mut tasks = self.tasks.write().await;
        let mut removed = 0;
        for id in expired {
            if tasks.remove(&id).is_some() {
                removed += 1;
            }
        }
        info!(removed, "swept expired tasks");
        removed
    }

    /// Periodic sweep loop; exits when the token is cancelled.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("task sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep(self.retention).await;
                }
            }
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmhand_core::types::FileProcessingResult;

    #[test]
    fn test_get_returns_consistent_snapshot() {
        tokio_test::block_on(async {
            let registry = TaskRegistry::new();
            registry.create("t1", "s1", 3).await;

            registry
                .mutate("t1", |task| {
                    task.start();
                    task.record_result(FileProcessingResult {
                        success: true,
                        ..FileProcessingResult::new("a.stl")
                    });
                })
                .await
                .unwrap();

            let snapshot = registry.get("t1").await.unwrap();
            assert_eq!(snapshot.status, TaskState::Processing);
            assert_eq!(snapshot.progress.completed, 1);
            assert_eq!(snapshot.results.len(), 1);
        });
    }

    #[test]
    fn test_mutate_unknown_task_is_not_found() {
        tokio_test::block_on(async {
            let registry = TaskRegistry::new();
            let result = registry.mutate("ghost", |_| {}).await;
            assert!(matches!(result, Err(StoreError::NotFound(_))));
        });
    }

    #[test]
    fn test_sweep_removes_only_old_terminal_tasks() {
        tokio_test::block_on(async {
            let registry = TaskRegistry::new();
            registry.create("done-old", "s", 0).await;
            registry.create("done-new", "s", 0).await;
            registry.create("running", "s", 1).await;

            registry
                .mutate("done-old", |task| {
                    task.finish(TaskState::Completed);
                    task.completed_at = Some(Utc::now() - chrono::Duration::hours(48));
                })
                .await
                .unwrap();
            registry
                .mutate("done-new", |task| task.finish(TaskState::Completed))
                .await
                .unwrap();
            registry
                .mutate("running", |task| task.start())
                .await
                .unwrap();

            let removed = registry.sweep(Duration::from_secs(24 * 60 * 60)).await;
            assert_eq!(removed, 1);
            assert!(registry.get("done-old").await.is_none());
            assert!(registry.get("done-new").await.is_some());
            assert!(registry.get("running").await.is_some());
        });
    }

    #[test]
    fn test_list_is_newest_first() {
        tokio_test::block_on(async {
            let registry = TaskRegistry::new();
            registry.create("t1", "s", 0).await;
            registry.create("t2", "s", 0).await;
            let list = registry.list().await;
            assert_eq!(list.len(), 2);
            assert!(list[0].created_at >= list[1].created_at);
        });
    }
}
