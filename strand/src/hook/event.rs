//! Lifecycle events and their typed inputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::CompactReason;
use crate::message::Message;
use crate::model::FinishReason;
use crate::usage::Usage;

/// A lifecycle boundary the hook pipeline intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookEvent {
    /// Before a model call is issued.
    PreGenerate,
    /// After a generation completes.
    PostGenerate,
    /// After a generation fails.
    PostGenerateFailure,
    /// Before a tool call executes.
    PreToolUse,
    /// After a tool call succeeds.
    PostToolUse,
    /// After a tool call fails.
    PostToolUseFailure,
    /// Before a compaction runs.
    PreCompact,
    /// After a compaction finishes or fails.
    PostCompact,
    /// An MCP plugin connection dropped.
    McpConnectionFailed,
    /// An MCP plugin connection came back.
    McpConnectionRestored,
    /// A tool was registered with the runtime.
    ToolRegistered,
    /// A tool failed to load.
    ToolLoadError,
}

impl HookEvent {
    /// Stable string name of the event.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreGenerate => "preGenerate",
            Self::PostGenerate => "postGenerate",
            Self::PostGenerateFailure => "postGenerateFailure",
            Self::PreToolUse => "preToolUse",
            Self::PostToolUse => "postToolUse",
            Self::PostToolUseFailure => "postToolUseFailure",
            Self::PreCompact => "preCompact",
            Self::PostCompact => "postCompact",
            Self::McpConnectionFailed => "mcpConnectionFailed",
            Self::McpConnectionRestored => "mcpConnectionRestored",
            Self::ToolRegistered => "toolRegistered",
            Self::ToolLoadError => "toolLoadError",
        }
    }

    /// Whether matchers apply to this event (they match on tool name).
    #[must_use]
    pub const fn is_tool_event(&self) -> bool {
        matches!(
            self,
            Self::PreToolUse
                | Self::PostToolUse
                | Self::PostToolUseFailure
                | Self::ToolRegistered
                | Self::ToolLoadError
        )
    }
}

/// Typed input delivered to hooks, one variant per event.
#[derive(Debug, Clone)]
pub enum HookInput {
    /// The messages about to be sent to the model.
    PreGenerate {
        /// Shaped conversation for the pending call.
        messages: Vec<Message>,
    },
    /// A completed generation.
    PostGenerate {
        /// Final assistant text.
        text: String,
        /// Why generation stopped.
        finish_reason: FinishReason,
        /// Cumulative usage for the call.
        usage: Usage,
    },
    /// A failed generation, or a hook failure during a pre/post event.
    PostGenerateFailure {
        /// Wire-shaped error.
        error: Value,
        /// `"model"`, or the name of the hook event that threw.
        origin: String,
    },
    /// A tool call about to execute.
    PreToolUse {
        /// Tool name.
        tool_name: String,
        /// Call identifier.
        tool_call_id: String,
        /// Tool input; later hooks see upstream modifications.
        input: Value,
    },
    /// A tool call that succeeded.
    PostToolUse {
        /// Tool name.
        tool_name: String,
        /// Call identifier.
        tool_call_id: String,
        /// The input the tool ran with.
        input: Value,
        /// Tool output.
        output: Value,
    },
    /// A tool call that failed, or a hook failure during a tool event.
    PostToolUseFailure {
        /// Tool name.
        tool_name: String,
        /// Call identifier.
        tool_call_id: String,
        /// The input the tool ran with.
        input: Value,
        /// Wire-shaped error.
        error: Value,
        /// `"tool"`, or the name of the hook event that threw.
        origin: String,
    },
    /// A compaction is about to run.
    PreCompact {
        /// Why compaction triggered.
        reason: CompactReason,
        /// Estimated or reported token count before compaction.
        current_tokens: u64,
        /// The budget ceiling.
        max_tokens: u64,
    },
    /// A compaction finished (or failed, when `error` is set).
    PostCompact {
        /// Token count before compaction.
        before_tokens: u64,
        /// Token count after compaction (unchanged on failure).
        after_tokens: u64,
        /// Failure message, if the summarizer failed.
        error: Option<String>,
    },
    /// An MCP plugin connection dropped.
    McpConnectionFailed {
        /// Plugin name.
        plugin: String,
        /// Failure description.
        error: String,
    },
    /// An MCP plugin connection came back.
    McpConnectionRestored {
        /// Plugin name.
        plugin: String,
    },
    /// A tool was registered.
    ToolRegistered {
        /// The registered tool's name.
        tool_name: String,
    },
    /// A tool failed to load.
    ToolLoadError {
        /// The failing tool's name.
        tool_name: String,
        /// Failure description.
        error: String,
    },
}

impl HookInput {
    /// The event this input belongs to.
    #[must_use]
    pub const fn event(&self) -> HookEvent {
        match self {
            Self::PreGenerate { .. } => HookEvent::PreGenerate,
            Self::PostGenerate { .. } => HookEvent::PostGenerate,
            Self::PostGenerateFailure { .. } => HookEvent::PostGenerateFailure,
            Self::PreToolUse { .. } => HookEvent::PreToolUse,
            Self::PostToolUse { .. } => HookEvent::PostToolUse,
            Self::PostToolUseFailure { .. } => HookEvent::PostToolUseFailure,
            Self::PreCompact { .. } => HookEvent::PreCompact,
            Self::PostCompact { .. } => HookEvent::PostCompact,
            Self::McpConnectionFailed { .. } => HookEvent::McpConnectionFailed,
            Self::McpConnectionRestored { .. } => HookEvent::McpConnectionRestored,
            Self::ToolRegistered { .. } => HookEvent::ToolRegistered,
            Self::ToolLoadError { .. } => HookEvent::ToolLoadError,
        }
    }

    /// The tool name, for events that carry one.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::PreToolUse { tool_name, .. }
            | Self::PostToolUse { tool_name, .. }
            | Self::PostToolUseFailure { tool_name, .. }
            | Self::ToolRegistered { tool_name }
            | Self::ToolLoadError { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }
}
