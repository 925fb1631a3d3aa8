//! The execution context handed to tools.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::signal::Signal;
use crate::state::AgentState;

/// What a tool sees while executing.
///
/// Tools run concurrently within a step; the shared [`AgentState`] is
/// handed off behind a mutex rather than borrowed from the run loop.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Cancellation signal for this call.
    pub signal: Signal,
    /// The owning thread, when the run is persistent.
    pub thread_id: Option<String>,
    /// Shared agent state (files + todos).
    pub state: Arc<Mutex<AgentState>>,
}

impl ToolContext {
    /// Create a context for one tool invocation.
    #[must_use]
    pub fn new(signal: Signal, thread_id: Option<String>, state: Arc<Mutex<AgentState>>) -> Self {
        Self {
            signal,
            thread_id,
            state,
        }
    }

    /// A detached context with fresh state, for tests and ad-hoc calls.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(Signal::new(), None, Arc::new(Mutex::new(AgentState::new())))
    }

    /// Emit a structured log line attributed to tool execution.
    pub fn log(&self, message: &str) {
        info!(target: "strand::tool", thread = ?self.thread_id, "{message}");
    }
}
