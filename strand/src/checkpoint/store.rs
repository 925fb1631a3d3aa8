//! Checkpoint store backends.
//!
//! Stores take deep-copied input and return deep-copied snapshots;
//! callers never alias store internals. An optional namespace prefix
//! lets multiple tenants share one backend without collision. Saves
//! enforce monotonic steps per thread.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::Checkpoint;

/// Durable checkpoint storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Write a checkpoint for its thread.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the checkpoint for a thread.
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// List checkpointed thread ids.
    async fn list(&self) -> Result<Vec<String>>;

    /// Delete a thread's checkpoint. Returns whether it existed.
    async fn delete(&self, thread_id: &str) -> Result<bool>;

    /// Whether a thread has a checkpoint.
    async fn exists(&self, thread_id: &str) -> Result<bool>;
}

fn check_monotonic(existing: Option<&Checkpoint>, incoming: &Checkpoint) -> Result<()> {
    if let Some(existing) = existing
        && incoming.step < existing.step
    {
        return Err(Error::store(format!(
            "checkpoint step went backwards for '{}': {} -> {}",
            incoming.thread_id, existing.step, incoming.step
        )));
    }
    Ok(())
}

/// In-memory store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    namespace: Option<String>,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store scoped to a namespace.
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    fn key(&self, thread_id: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{thread_id}"),
            None => thread_id.to_owned(),
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let key = self.key(&checkpoint.thread_id);
        let mut checkpoints = self.checkpoints.write().await;
        check_monotonic(checkpoints.get(&key), checkpoint)?;
        checkpoints.insert(key, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(&self.key(thread_id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let prefix = self
            .namespace
            .as_ref()
            .map(|ns| format!("{ns}:"))
            .unwrap_or_default();
        let mut ids: Vec<String> = self
            .checkpoints
            .read()
            .await
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix).map(ToOwned::to_owned))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        Ok(self
            .checkpoints
            .write()
            .await
            .remove(&self.key(thread_id))
            .is_some())
    }

    async fn exists(&self, thread_id: &str) -> Result<bool> {
        Ok(self
            .checkpoints
            .read()
            .await
            .contains_key(&self.key(thread_id)))
    }
}

/// Filesystem store: one JSON file per thread, namespaces as
/// subdirectories.
#[derive(Debug)]
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    /// Create a store rooted at `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Create a store under `dir/<namespace>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the directory cannot be created.
    pub fn namespaced(dir: impl Into<PathBuf>, namespace: &str) -> Result<Self> {
        Self::new(dir.into().join(namespace))
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{thread_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let existing = self.load(&checkpoint.thread_id).await?;
        check_monotonic(existing.as_ref(), checkpoint)?;
        let data = serde_json::to_string_pretty(checkpoint)?;
        std::fs::write(self.path_for(&checkpoint.thread_id), data)?;
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        match std::fs::read_to_string(self.path_for(thread_id)) {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        match std::fs::remove_file(self.path_for(thread_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, thread_id: &str) -> Result<bool> {
        Ok(self.path_for(thread_id).exists())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn checkpoint(thread: &str, step: u64) -> Checkpoint {
        let mut cp = Checkpoint::new(thread);
        cp.step = step;
        cp.messages.push(Message::user("hello"));
        cp
    }

    mod in_memory {
        use super::*;

        #[tokio::test]
        async fn save_load_round_trip_is_stable() {
            let store = InMemoryCheckpointStore::new();
            let cp = checkpoint("t1", 1);
            store.save(&cp).await.unwrap();

            let first = store.load("t1").await.unwrap().unwrap();
            store.save(&first).await.unwrap();
            let second = store.load("t1").await.unwrap().unwrap();
            assert_eq!(first, second);
            assert_eq!(second, cp);
        }

        #[tokio::test]
        async fn loads_are_deep_copies() {
            let store = InMemoryCheckpointStore::new();
            store.save(&checkpoint("t1", 1)).await.unwrap();

            let mut loaded = store.load("t1").await.unwrap().unwrap();
            loaded.messages.push(Message::user("mutated"));
            // The store is unaffected by mutating the loaded copy.
            assert_eq!(store.load("t1").await.unwrap().unwrap().messages.len(), 1);
        }

        #[tokio::test]
        async fn step_must_not_decrease() {
            let store = InMemoryCheckpointStore::new();
            store.save(&checkpoint("t1", 5)).await.unwrap();
            store.save(&checkpoint("t1", 5)).await.unwrap();
            store.save(&checkpoint("t1", 6)).await.unwrap();

            let err = store.save(&checkpoint("t1", 2)).await.unwrap_err();
            assert!(matches!(err, Error::Store { .. }));
        }

        #[tokio::test]
        async fn namespaces_do_not_collide() {
            let tenant_a = InMemoryCheckpointStore::namespaced("a");
            let tenant_b = InMemoryCheckpointStore::namespaced("b");
            tenant_a.save(&checkpoint("t1", 1)).await.unwrap();

            assert!(tenant_a.exists("t1").await.unwrap());
            assert!(!tenant_b.exists("t1").await.unwrap());
            assert_eq!(tenant_a.list().await.unwrap(), vec!["t1"]);
            assert!(tenant_b.list().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn delete_reports_presence() {
            let store = InMemoryCheckpointStore::new();
            store.save(&checkpoint("t1", 1)).await.unwrap();
            assert!(store.delete("t1").await.unwrap());
            assert!(!store.delete("t1").await.unwrap());
            assert!(!store.exists("t1").await.unwrap());
        }
    }

    mod filesystem {
        use super::*;

        #[tokio::test]
        async fn save_load_round_trip_on_disk() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsCheckpointStore::new(dir.path()).unwrap();
            let cp = checkpoint("t1", 3);
            store.save(&cp).await.unwrap();

            let loaded = store.load("t1").await.unwrap().unwrap();
            assert_eq!(loaded, cp);
            assert_eq!(store.list().await.unwrap(), vec!["t1"]);
        }

        #[tokio::test]
        async fn namespaced_stores_use_subdirectories() {
            let dir = tempfile::tempdir().unwrap();
            let tenant_a = FsCheckpointStore::namespaced(dir.path(), "a").unwrap();
            let tenant_b = FsCheckpointStore::namespaced(dir.path(), "b").unwrap();
            tenant_a.save(&checkpoint("t1", 1)).await.unwrap();

            assert!(tenant_a.exists("t1").await.unwrap());
            assert!(!tenant_b.exists("t1").await.unwrap());
            assert!(dir.path().join("a").join("t1.json").exists());
        }

        #[tokio::test]
        async fn monotonic_step_enforced_across_reloads() {
            let dir = tempfile::tempdir().unwrap();
            let store = FsCheckpointStore::new(dir.path()).unwrap();
            store.save(&checkpoint("t1", 4)).await.unwrap();

            let reopened = FsCheckpointStore::new(dir.path()).unwrap();
            assert!(reopened.save(&checkpoint("t1", 3)).await.is_err());
        }
    }
}
