//! Token budget snapshots.

use serde::{Deserialize, Serialize};

/// Where a conversation stands against its token ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Tokens currently consumed by the conversation.
    pub current_tokens: u64,
    /// The ceiling.
    pub max_tokens: u64,
    /// `current / max`, in `[0, 1]` (saturating above the ceiling).
    pub usage: f64,
    /// Tokens left under the ceiling.
    pub remaining: u64,
    /// True iff derived from the model's last reported usage rather than
    /// an estimate.
    pub is_actual: bool,
}

impl TokenBudget {
    /// Build a budget snapshot.
    #[must_use]
    pub fn new(current_tokens: u64, max_tokens: u64, is_actual: bool) -> Self {
        let usage = if max_tokens == 0 {
            1.0
        } else {
            (current_tokens as f64 / max_tokens as f64).min(1.0)
        };
        Self {
            current_tokens,
            max_tokens,
            usage,
            remaining: max_tokens.saturating_sub(current_tokens),
            is_actual,
        }
    }
}
