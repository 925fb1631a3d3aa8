//! Per-agent mutable state: files and todos.
//!
//! [`AgentState`] is owned exclusively by one agent. Subagents fork an
//! isolated copy sharing the parent's file snapshot; on termination the
//! subagent's modified file set is merged back, last-writer-wins on path
//! collisions. Todos are never merged.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A file tracked in agent state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File content.
    pub content: String,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Not yet started.
    Pending,
    /// Currently being worked on.
    InProgress,
    /// Finished.
    Completed,
}

/// One entry in the agent's todo list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Stable identifier.
    pub id: String,
    /// What needs doing.
    pub text: String,
    /// Current status.
    pub status: TodoStatus,
}

/// Mutable state owned by a single agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Insertion-ordered mapping from path to file record.
    pub files: IndexMap<String, FileRecord>,
    /// Ordered todo list.
    pub todos: Vec<TodoItem>,
}

impl AgentState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a file, creating or replacing the record at `path`.
    pub fn write_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let now = Utc::now();
        let path = path.into();
        match self.files.get_mut(&path) {
            Some(record) => {
                record.content = content.into();
                record.updated_at = now;
            }
            None => {
                self.files.insert(
                    path,
                    FileRecord {
                        content: content.into(),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }

    /// Read a file's content, if present.
    #[must_use]
    pub fn read_file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|record| record.content.as_str())
    }

    /// Replace the todo list.
    pub fn set_todos(&mut self, todos: Vec<TodoItem>) {
        self.todos = todos;
    }

    /// Fork an isolated state for a subagent: files are shared as a
    /// snapshot, todos start empty.
    #[must_use]
    pub fn fork(&self) -> SubagentState {
        let baseline = self
            .files
            .iter()
            .map(|(path, record)| (path.clone(), record.updated_at))
            .collect();
        SubagentState {
            state: Self {
                files: self.files.clone(),
                todos: Vec::new(),
            },
            baseline,
        }
    }

    /// Merge a terminated subagent's modified files into this state.
    ///
    /// Only files the subagent created or rewrote are copied back;
    /// collisions are resolved last-writer-wins (the subagent wins, since
    /// it terminates after the fork). Todos are not merged. Returns the
    /// paths that were merged.
    pub fn merge_subagent(&mut self, child: SubagentState) -> Vec<String> {
        let SubagentState { state, baseline } = child;
        let mut merged = Vec::new();
        for (path, record) in state.files {
            let unchanged = baseline
                .get(&path)
                .is_some_and(|stamp| *stamp == record.updated_at);
            if !unchanged {
                self.files.insert(path.clone(), record);
                merged.push(path);
            }
        }
        merged
    }
}

/// An isolated subagent state plus the fork baseline used to detect
/// modifications at merge time.
#[derive(Debug, Clone)]
pub struct SubagentState {
    /// The subagent's own state.
    pub state: AgentState,
    baseline: HashMap<String, DateTime<Utc>>,
}

impl SubagentState {
    /// Mutable access to the subagent's state.
    pub fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }
}
