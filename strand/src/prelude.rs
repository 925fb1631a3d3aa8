//! Convenience re-exports for common usage.

pub use std::sync::Arc;

pub use crate::agent::{
    Agent, AgentBuilder, Completion, GenerateOptions, GenerateResult, Interruption,
    PermissionMode, SubagentSpec,
};
pub use crate::checkpoint::{
    ApprovalResponse, Checkpoint, CheckpointStore, FsCheckpointStore, InMemoryCheckpointStore,
    Interrupt,
};
pub use crate::context::{
    ApproximateCounter, BackgroundCompaction, CompactReason, ContextConfig, ContextManager,
    StructuredSummary, SummaryStrategy, Summarizer, TokenBudget, TokenCounter,
};
pub use crate::error::{Error, Result};
pub use crate::hook::{
    HookEvent, HookInput, HookOutput, HookRegistry, PermissionDecision, hook,
};
pub use crate::message::{ContentPart, Message, Role, ToolCall};
pub use crate::model::{FinishReason, ModelProvider, ModelResponse, StreamPart};
pub use crate::retry::{CircuitBreaker, CircuitBreakerConfig};
pub use crate::signal::Signal;
pub use crate::state::{AgentState, TodoItem, TodoStatus};
pub use crate::task::{
    BackgroundTask, FsTaskStore, InMemoryTaskStore, TaskManager, TaskStatus, TaskStore,
};
pub use crate::tool::{BoxedTool, DynTool, Tool, ToolContext, ToolDefinition, ToolRegistry};
pub use crate::usage::Usage;
