//! Results of a `generate` call.

use crate::checkpoint::Interrupt;
use crate::message::{Message, ToolCall};
use crate::model::FinishReason;
use crate::tool::ToolCallOutcome;
use crate::usage::Usage;

/// A run that reached a terminal state.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Final assistant text.
    pub text: String,
    /// The full conversation, including injected tool results.
    pub messages: Vec<Message>,
    /// Why the run stopped.
    pub finish_reason: FinishReason,
    /// Cumulative usage across all model calls.
    pub usage: Usage,
    /// Every tool call the model emitted.
    pub tool_calls: Vec<ToolCall>,
    /// Every tool outcome, in emission order.
    pub tool_results: Vec<ToolCallOutcome>,
}

/// A run suspended on an interrupt.
#[derive(Debug, Clone)]
pub struct Interruption {
    /// The pending interrupt awaiting a response.
    pub interrupt: Interrupt,
    /// The conversation at suspension time.
    pub messages: Vec<Message>,
    /// Where the suspended checkpoint was persisted.
    pub checkpoint_id: String,
}

/// Outcome of one `generate` call.
#[derive(Debug, Clone)]
pub enum GenerateResult {
    /// The run finished.
    Complete(Completion),
    /// The run is suspended awaiting an interrupt response.
    Interrupted(Interruption),
}

impl GenerateResult {
    /// Whether the run finished.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// The completion, if the run finished.
    #[must_use]
    pub const fn as_complete(&self) -> Option<&Completion> {
        match self {
            Self::Complete(completion) => Some(completion),
            Self::Interrupted(_) => None,
        }
    }

    /// The interruption, if the run suspended.
    #[must_use]
    pub const fn as_interrupted(&self) -> Option<&Interruption> {
        match self {
            Self::Interrupted(interruption) => Some(interruption),
            Self::Complete(_) => None,
        }
    }
}
