//! The task manager: lifecycle, events, and recovery.
//!
//! A task's state machine is single-owner; when the store is shared, an
//! optimistic guard re-reads the status before every transition write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::store::{TaskFilter, TaskStore};
use super::{BackgroundTask, INTERRUPTED_BY_RESTART, TaskStatus};

/// Lifecycle events emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A task was created.
    Created {
        /// Task id.
        id: String,
    },
    /// A task started running.
    Started {
        /// Task id.
        id: String,
    },
    /// A task completed.
    Completed {
        /// Task id.
        id: String,
    },
    /// A task failed.
    Failed {
        /// Task id.
        id: String,
    },
    /// A task was killed.
    Killed {
        /// Task id.
        id: String,
    },
    /// A task was deleted by cleanup.
    CleanedUp {
        /// Task id.
        id: String,
    },
}

/// Owns the lifecycle and persistence of background tasks.
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    events: broadcast::Sender<TaskEvent>,
    handles: Mutex<HashMap<String, AbortHandle>>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager").finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Create a manager over a store.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            events,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }

    /// Create and persist a pending task.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn create(&self, task: BackgroundTask) -> Result<BackgroundTask> {
        self.store.save(&task).await?;
        self.emit(TaskEvent::Created {
            id: task.id.clone(),
        });
        Ok(task)
    }

    /// Transition a task with the optimistic ownership guard: the status
    /// is re-read and must still be `expected` before the write.
    async fn transition_guarded<F>(
        &self,
        id: &str,
        expected: TaskStatus,
        apply: F,
    ) -> Result<BackgroundTask>
    where
        F: FnOnce(&mut BackgroundTask) -> Result<()>,
    {
        let mut task = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| Error::store(format!("task '{id}' not found")))?;
        if task.status != expected {
            return Err(Error::store(format!(
                "task '{id}' changed owner: expected {expected:?}, found {:?}",
                task.status
            )));
        }
        apply(&mut task)?;
        self.store.save(&task).await?;
        Ok(task)
    }

    /// Start a pending task and drive `work` to a terminal status in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns an error when the task is missing or not pending.
    pub async fn spawn<F>(self: &Arc<Self>, id: &str, work: F) -> Result<()>
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        self.transition_guarded(id, TaskStatus::Pending, BackgroundTask::start)
            .await?;
        self.emit(TaskEvent::Started { id: id.to_owned() });

        let manager = Arc::clone(self);
        let task_id = id.to_owned();
        let handle = tokio::spawn(async move {
            let outcome = work.await;
            manager.finish(&task_id, outcome).await;
        });
        self.handles
            .lock()
            .await
            .insert(id.to_owned(), handle.abort_handle());
        Ok(())
    }

    async fn finish(&self, id: &str, outcome: Result<String>) {
        self.handles.lock().await.remove(id);
        let result = match outcome {
            Ok(result) => {
                self.transition_guarded(id, TaskStatus::Running, |t| t.complete(result))
                    .await
                    .map(|_| TaskEvent::Completed { id: id.to_owned() })
            }
            Err(error) => {
                warn!(task = %id, %error, "Background task failed");
                self.transition_guarded(id, TaskStatus::Running, |t| t.fail(error.to_string()))
                    .await
                    .map(|_| TaskEvent::Failed { id: id.to_owned() })
            }
        };
        match result {
            Ok(event) => self.emit(event),
            // The task was killed (or taken over) while the work ran;
            // the terminal status on record wins.
            Err(error) => info!(task = %id, %error, "Task finish superseded"),
        }
    }

    /// Kill a pending or running task. Returns the updated record, or
    /// `None` if the task was already terminal.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn kill(&self, id: &str) -> Result<Option<BackgroundTask>> {
        if let Some(handle) = self.handles.lock().await.remove(id) {
            handle.abort();
        }
        let Some(task) = self.store.load(id).await? else {
            return Err(Error::store(format!("task '{id}' not found")));
        };
        if task.status.is_terminal() {
            return Ok(None);
        }
        let killed = self
            .transition_guarded(id, task.status, BackgroundTask::kill)
            .await?;
        self.emit(TaskEvent::Killed { id: id.to_owned() });
        Ok(Some(killed))
    }

    /// Wait until a task reaches a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the task disappears.
    pub async fn wait(&self, id: &str) -> Result<BackgroundTask> {
        loop {
            let task = self
                .store
                .load(id)
                .await?
                .ok_or_else(|| Error::store(format!("task '{id}' vanished while waited on")))?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Delete stale terminal tasks, emitting a `CleanedUp` event per
    /// deletion. Returns the count.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cleanup_stale(&self, max_age: Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|e| Error::validation(format!("bad max_age: {e}")))?;
        let mut deleted = 0;
        for task in self.store.list_tasks(None).await? {
            if task.status.is_terminal() && task.updated_at < cutoff {
                self.store.delete(&task.id).await?;
                self.emit(TaskEvent::CleanedUp { id: task.id });
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Fail every `running` task left behind by a dead process.
///
/// Returns how many tasks were transitioned; each carries the synthetic
/// `interrupted-by-restart` error.
///
/// # Errors
///
/// Propagates store failures.
pub async fn recover_running_tasks(store: &dyn TaskStore) -> Result<usize> {
    let running = store
        .list_tasks(Some(&TaskFilter::status(TaskStatus::Running)))
        .await?;
    let mut recovered = 0;
    for mut task in running {
        task.fail(INTERRUPTED_BY_RESTART)?;
        store.save(&task).await?;
        recovered += 1;
    }
    if recovered > 0 {
        info!(count = recovered, "Recovered interrupted tasks");
    }
    Ok(recovered)
}

/// Failed tasks eligible for caller-driven retry.
///
/// Callers requeue a task by writing back `pending` with the error
/// cleared ([`BackgroundTask::requeue`]).
///
/// # Errors
///
/// Propagates store failures.
pub async fn recover_failed_tasks(
    store: &dyn TaskStore,
    filter: Option<&TaskFilter>,
) -> Result<Vec<BackgroundTask>> {
    let mut failed = store
        .list_tasks(Some(&TaskFilter::status(TaskStatus::Failed)))
        .await?;
    if let Some(filter) = filter {
        failed.retain(|t| filter.matches(t));
    }
    Ok(failed)
}

/// Render a completed task as the injected follow-up user message.
#[must_use]
pub fn format_task_completion(task: &BackgroundTask) -> String {
    format!(
        "Background task '{}' ({}) completed:\n{}",
        task.description,
        task.subagent_type,
        task.result.as_deref().unwrap_or("(no result)")
    )
}

/// Render a failed task as the injected follow-up user message.
#[must_use]
pub fn format_task_failure(task: &BackgroundTask) -> String {
    format!(
        "Background task '{}' ({}) failed:\n{}",
        task.description,
        task.subagent_type,
        task.error.as_deref().unwrap_or("(no error recorded)")
    )
}
