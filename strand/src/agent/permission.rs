//! Runtime-wide permission modes.

use serde::{Deserialize, Serialize};

use crate::hook::PermissionDecision;
use crate::tool::ToolDefinition;

/// How tool calls are gated when no hook decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Every tool call is allowed.
    AcceptAll,
    /// File-editing tools are allowed; everything else asks. Backends
    /// configured for this mode also reject mutating shell commands.
    AcceptEdits,
    /// Every tool call asks.
    ApprovalRequired,
    /// Write-access tools are denied; the rest are allowed.
    ReadOnly,
}

impl PermissionMode {
    /// The aggregation default for a tool call under this mode, applied
    /// when no hook emits a permission decision.
    #[must_use]
    pub const fn default_decision(&self, definition: &ToolDefinition) -> PermissionDecision {
        match self {
            Self::AcceptAll => PermissionDecision::Allow,
            Self::AcceptEdits => {
                if definition.write_access {
                    PermissionDecision::Allow
                } else {
                    PermissionDecision::Ask
                }
            }
            Self::ApprovalRequired => PermissionDecision::Ask,
            Self::ReadOnly => {
                if definition.write_access {
                    PermissionDecision::Deny
                } else {
                    PermissionDecision::Allow
                }
            }
        }
    }
}
