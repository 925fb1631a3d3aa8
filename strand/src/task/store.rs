//! Task store backends.
//!
//! The store is the source of truth; all mutations are save-through and
//! list operations preserve insertion order. Two backends: in-memory
//! (tests, single-process runs) and filesystem (one JSON file per task).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::{BackgroundTask, TaskStatus};

/// Filter for list operations.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Match only this status.
    pub status: Option<TaskStatus>,
    /// Match only this subagent type.
    pub subagent_type: Option<String>,
}

impl TaskFilter {
    /// Filter by status.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            subagent_type: None,
        }
    }

    /// Whether `task` passes the filter.
    #[must_use]
    pub fn matches(&self, task: &BackgroundTask) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self
                .subagent_type
                .as_ref()
                .is_none_or(|t| &task.subagent_type == t)
    }
}

/// Durable task storage.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Write a task, creating or replacing it.
    async fn save(&self, task: &BackgroundTask) -> Result<()>;

    /// Load a task by id.
    async fn load(&self, id: &str) -> Result<Option<BackgroundTask>>;

    /// Delete a task. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// List matching task ids, in insertion order.
    async fn list(&self, filter: Option<&TaskFilter>) -> Result<Vec<String>>;

    /// List matching tasks, in insertion order.
    async fn list_tasks(&self, filter: Option<&TaskFilter>) -> Result<Vec<BackgroundTask>>;

    /// Whether a task exists.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Delete terminal tasks not written for longer than `max_age`.
    /// Returns how many were deleted.
    async fn cleanup(&self, max_age: Duration) -> Result<usize>;
}

/// In-memory store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<IndexMap<String, BackgroundTask>>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, task: &BackgroundTask) -> Result<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<BackgroundTask>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.tasks.write().await.shift_remove(id).is_some())
    }

    async fn list(&self, filter: Option<&TaskFilter>) -> Result<Vec<String>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| filter.is_none_or(|f| f.matches(t)))
            .map(|t| t.id.clone())
            .collect())
    }

    async fn list_tasks(&self, filter: Option<&TaskFilter>) -> Result<Vec<BackgroundTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| filter.is_none_or(|f| f.matches(t)))
            .cloned()
            .collect())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.tasks.read().await.contains_key(id))
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|e| Error::validation(format!("bad max_age: {e}")))?;
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| !(task.status.is_terminal() && task.updated_at < cutoff));
        Ok(before - tasks.len())
    }
}

/// Filesystem store: one JSON file per task under a directory.
#[derive(Debug)]
pub struct FsTaskStore {
    dir: PathBuf,
}

impl FsTaskStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read_all(&self) -> Result<Vec<BackgroundTask>> {
        let mut tasks = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let data = std::fs::read_to_string(&path)?;
                tasks.push(serde_json::from_str(&data)?);
            }
        }
        // Directory order is arbitrary; creation time recovers insertion
        // order.
        tasks.sort_by(|a: &BackgroundTask, b: &BackgroundTask| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}

#[async_trait]
impl TaskStore for FsTaskStore {
    async fn save(&self, task: &BackgroundTask) -> Result<()> {
        let data = serde_json::to_string_pretty(task)?;
        std::fs::write(self.path_for(&task.id), data)?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<BackgroundTask>> {
        match std::fs::read_to_string(self.path_for(id)) {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, filter: Option<&TaskFilter>) -> Result<Vec<String>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|t| filter.is_none_or(|f| f.matches(t)))
            .map(|t| t.id)
            .collect())
    }

    async fn list_tasks(&self, filter: Option<&TaskFilter>) -> Result<Vec<BackgroundTask>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|t| filter.is_none_or(|f| f.matches(t)))
            .collect())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.path_for(id).exists())
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|e| Error::validation(format!("bad max_age: {e}")))?;
        let mut deleted = 0;
        for task in self.read_all()? {
            if task.status.is_terminal() && task.updated_at < cutoff {
                std::fs::remove_file(self.path_for(&task.id))?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Delete stale terminal tasks from any store.
///
/// # Errors
///
/// Propagates store failures.
pub async fn cleanup_stale_tasks(store: &dyn TaskStore, max_age: Duration) -> Result<usize> {
    store.cleanup(max_age).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn completed_task(name: &str) -> BackgroundTask {
        let mut task = BackgroundTask::new(name, "work");
        task.start().unwrap();
        task.complete("done").unwrap();
        task
    }

    mod in_memory {
        use super::*;

        #[tokio::test]
        async fn save_load_round_trip() {
            let store = InMemoryTaskStore::new();
            let task = BackgroundTask::new("research", "find it");
            store.save(&task).await.unwrap();

            assert!(store.exists(&task.id).await.unwrap());
            assert_eq!(store.load(&task.id).await.unwrap().unwrap(), task);
            assert!(store.load("missing").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn list_preserves_insertion_order() {
            let store = InMemoryTaskStore::new();
            let a = BackgroundTask::new("a", "first");
            let b = BackgroundTask::new("b", "second");
            store.save(&a).await.unwrap();
            store.save(&b).await.unwrap();

            assert_eq!(store.list(None).await.unwrap(), vec![a.id, b.id]);
        }

        #[tokio::test]
        async fn filters_apply_to_lists() {
            let store = InMemoryTaskStore::new();
            let pending = BackgroundTask::new("research", "waiting");
            store.save(&pending).await.unwrap();
            store.save(&completed_task("research")).await.unwrap();

            let only_pending = store
                .list_tasks(Some(&TaskFilter::status(TaskStatus::Pending)))
                .await
                .unwrap();
            assert_eq!(only_pending.len(), 1);
            assert_eq!(only_pending[0].id, pending.id);
        }

        #[tokio::test]
        async fn delete_reports_presence() {
            let store = InMemoryTaskStore::new();
            let task = BackgroundTask::new("a", "x");
            store.save(&task).await.unwrap();
            assert!(store.delete(&task.id).await.unwrap());
            assert!(!store.delete(&task.id).await.unwrap());
        }

        #[tokio::test]
        async fn cleanup_removes_only_stale_terminal_tasks() {
            let store = InMemoryTaskStore::new();
            let pending = BackgroundTask::new("a", "still going");
            let mut stale = completed_task("b");
            stale.updated_at = Utc::now() - chrono::Duration::hours(2);
            store.save(&pending).await.unwrap();
            store.save(&stale).await.unwrap();
            store.save(&completed_task("c")).await.unwrap();

            let deleted = store.cleanup(Duration::from_secs(3600)).await.unwrap();
            assert_eq!(deleted, 1);
            assert!(!store.exists(&stale.id).await.unwrap());
            assert!(store.exists(&pending.id).await.unwrap());
        }
    }

    mod filesystem {
        use super::*;

        #[tokio::test]
        async fn save_load_round_trip_on_disk() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsTaskStore::new(dir.path()).unwrap();
            let task = BackgroundTask::new("research", "find it");
            store.save(&task).await.unwrap();

            assert!(store.exists(&task.id).await.unwrap());
            assert_eq!(store.load(&task.id).await.unwrap().unwrap(), task);

            // One file per task.
            let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
            assert_eq!(files.len(), 1);
        }

        #[tokio::test]
        async fn list_orders_by_creation() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsTaskStore::new(dir.path()).unwrap();
            let mut first = BackgroundTask::new("a", "first");
            first.created_at = Utc::now() - chrono::Duration::minutes(5);
            let second = BackgroundTask::new("b", "second");
            // Save out of order.
            store.save(&second).await.unwrap();
            store.save(&first).await.unwrap();

            assert_eq!(
                store.list(None).await.unwrap(),
                vec![first.id, second.id]
            );
        }

        #[tokio::test]
        async fn cleanup_deletes_files() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsTaskStore::new(dir.path()).unwrap();
            let mut stale = completed_task("a");
            stale.updated_at = Utc::now() - chrono::Duration::hours(1);
            store.save(&stale).await.unwrap();

            let deleted = cleanup_stale_tasks(&store, Duration::from_secs(60)).await.unwrap();
            assert_eq!(deleted, 1);
            assert!(store.list(None).await.unwrap().is_empty());
        }
    }
}
