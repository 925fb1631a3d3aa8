//! Background tasks: out-of-band subagent executions.
//!
//! A [`BackgroundTask`] moves along a fixed transition graph:
//!
//! ```text
//! pending → running → completed
//!                   → failed
//! pending → killed
//! running → killed
//! ```
//!
//! Terminal statuses are immutable except for deletion by cleanup. Every
//! state write updates `updated_at`; `completed_at` is set exactly at the
//! terminal transition.

mod manager;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub use manager::{
    TaskEvent, TaskManager, format_task_completion, format_task_failure, recover_failed_tasks,
    recover_running_tasks,
};
pub use store::{FsTaskStore, InMemoryTaskStore, TaskFilter, TaskStore, cleanup_stale_tasks};

/// Synthetic error written to tasks found running after a restart.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted-by-restart";

/// Lifecycle status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet started.
    Pending,
    /// Executing.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped before finishing.
    Killed,
}

impl TaskStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Killed)
    }

    /// Whether `next` is a legal transition from this status.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Killed)
                | (Self::Running, Self::Completed | Self::Failed | Self::Killed)
        )
    }
}

/// A durable record of one out-of-band subagent execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTask {
    /// Task identifier.
    pub id: String,
    /// Which subagent runs the task.
    pub subagent_type: String,
    /// What the task is doing.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last written.
    pub updated_at: DateTime<Utc>,
    /// When the task reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Result text, for completed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error text, for failed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Checkpoint of the generate call that enqueued this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<String>,
}

impl BackgroundTask {
    /// Create a pending task.
    #[must_use]
    pub fn new(subagent_type: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            subagent_type: subagent_type.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            error: None,
            parent_checkpoint_id: None,
        }
    }

    /// Attach the enqueueing checkpoint.
    #[must_use]
    pub fn with_parent_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.parent_checkpoint_id = Some(checkpoint_id.into());
        self
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::validation(format!(
                "illegal task transition {:?} -> {next:?} for '{}'",
                self.status, self.id
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Mark the task running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the task is not pending.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)
    }

    /// Complete the task with a result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the task is not running.
    pub fn complete(&mut self, result: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result.into());
        Ok(())
    }

    /// Fail the task with an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the task is not running.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Kill the task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the task is already terminal.
    pub fn kill(&mut self) -> Result<()> {
        self.transition(TaskStatus::Killed)
    }

    /// Reset a failed task to pending for a retry, clearing its error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for tasks that have not failed.
    pub fn requeue(&mut self) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(Error::validation(format!(
                "only failed tasks can be requeued, '{}' is {:?}",
                self.id, self.status
            )));
        }
        self.status = TaskStatus::Pending;
        self.updated_at = Utc::now();
        self.completed_at = None;
        self.error = None;
        Ok(())
    }
}
