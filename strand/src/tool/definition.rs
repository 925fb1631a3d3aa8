//! Tool definitions advertised to the model and the runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declaration of a tool: schema for the model, flags for the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name; unique within the active tool set.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the tool's input.
    pub input_schema: Value,
    /// Whether every call requires user approval regardless of hooks.
    #[serde(default)]
    pub approval_required: bool,
    /// Whether calls run as background tasks, returning a task id
    /// synchronously instead of blocking the step.
    #[serde(default)]
    pub background: bool,
    /// Whether the tool writes files or otherwise mutates state; drives
    /// the `accept-edits` and `readonly` permission modes.
    #[serde(default)]
    pub write_access: bool,
    /// Per-tool execution deadline; the agent default applies when unset.
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// Output size cap in bytes; larger outputs are truncated and flagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_size: Option<usize>,
}

impl ToolDefinition {
    /// Create a definition with no flags set.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            approval_required: false,
            background: false,
            write_access: false,
            timeout: None,
            max_output_size: None,
        }
    }

    /// Require user approval for every call.
    #[must_use]
    pub const fn require_approval(mut self) -> Self {
        self.approval_required = true;
        self
    }

    /// Run calls as background tasks.
    #[must_use]
    pub const fn in_background(mut self) -> Self {
        self.background = true;
        self
    }

    /// Mark the tool as writing files or mutating state.
    #[must_use]
    pub const fn with_write_access(mut self) -> Self {
        self.write_access = true;
        self
    }

    /// Set a per-tool execution deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cap output size in bytes.
    #[must_use]
    pub const fn with_max_output_size(mut self, bytes: usize) -> Self {
        self.max_output_size = Some(bytes);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_flags_compose() {
        let def = ToolDefinition::new("bash", "run a command", json!({"type": "object"}))
            .require_approval()
            .with_write_access()
            .with_timeout(Duration::from_secs(30))
            .with_max_output_size(16 * 1024);
        assert!(def.approval_required);
        assert!(def.write_access);
        assert!(!def.background);
        assert_eq!(def.timeout, Some(Duration::from_secs(30)));
        assert_eq!(def.max_output_size, Some(16 * 1024));
    }

    #[test]
    fn serde_omits_runtime_only_fields() {
        let def = ToolDefinition::new("read", "read a file", json!({"type": "object"}))
            .with_timeout(Duration::from_secs(5));
        let encoded = serde_json::to_value(&def).unwrap();
        assert_eq!(encoded["name"], "read");
        assert!(encoded.get("timeout").is_none());

        let decoded: ToolDefinition = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.timeout, None);
        assert_eq!(decoded.name, "read");
    }
}
