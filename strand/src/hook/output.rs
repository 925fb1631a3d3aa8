//! Hook outputs and their decision fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Permission verdict for a tool call.
///
/// Aggregation priority across all hook outputs for one call is
/// `Deny > Ask > Allow`, falling back to the configured default when no
/// hook decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    /// Execute the tool.
    Allow,
    /// Refuse the tool; a denial result is injected.
    Deny,
    /// Suspend the run and ask the user.
    Ask,
}

impl PermissionDecision {
    /// Rank for aggregation; higher wins.
    const fn rank(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Ask => 1,
            Self::Deny => 2,
        }
    }

    /// The stronger of two decisions.
    #[must_use]
    pub fn strongest(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }
}

const fn default_true() -> bool {
    true
}

/// The result of one hook callback.
///
/// All fields are optional; an empty output is a pure observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookOutput {
    /// Permission verdict (`PreToolUse` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,

    /// Short-circuit with a synthetic result (pre-events only). The first
    /// non-empty value wins; remaining hooks still run for side effects
    /// unless `continue` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respond_with: Option<Value>,

    /// Request a retry (post-failure events only). The first output with
    /// `retry` set wins.
    #[serde(default)]
    pub retry: bool,

    /// Delay before the retry, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    /// Replace the forward input; downstream hooks see the modified
    /// value. Applies to events with a JSON input payload (tool events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_input: Option<Value>,

    /// When false, remaining hooks for this event are skipped. Never
    /// aborts the run itself.
    #[serde(default = "default_true", rename = "continue")]
    pub continue_: bool,

    /// Force this step's tool calls to execute sequentially.
    #[serde(default)]
    pub sequential: bool,
}

impl Default for HookOutput {
    fn default() -> Self {
        Self {
            permission_decision: None,
            respond_with: None,
            retry: false,
            retry_delay_ms: None,
            modified_input: None,
            continue_: true,
            sequential: false,
        }
    }
}

impl HookOutput {
    /// A pure observation: no decisions.
    #[must_use]
    pub fn observe() -> Self {
        Self::default()
    }

    /// Allow the tool call.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            permission_decision: Some(PermissionDecision::Allow),
            ..Self::default()
        }
    }

    /// Deny the tool call.
    #[must_use]
    pub fn deny() -> Self {
        Self {
            permission_decision: Some(PermissionDecision::Deny),
            ..Self::default()
        }
    }

    /// Require user approval for the tool call.
    #[must_use]
    pub fn ask() -> Self {
        Self {
            permission_decision: Some(PermissionDecision::Ask),
            ..Self::default()
        }
    }

    /// Short-circuit the event with a synthetic result.
    #[must_use]
    pub fn respond(value: Value) -> Self {
        Self {
            respond_with: Some(value),
            ..Self::default()
        }
    }

    /// Request a retry after `delay_ms`.
    #[must_use]
    pub fn retry_after_ms(delay_ms: u64) -> Self {
        Self {
            retry: true,
            retry_delay_ms: Some(delay_ms),
            ..Self::default()
        }
    }

    /// Replace the forward input for downstream hooks and execution.
    #[must_use]
    pub fn modify_input(value: Value) -> Self {
        Self {
            modified_input: Some(value),
            ..Self::default()
        }
    }

    /// Skip the remaining hooks for this event.
    #[must_use]
    pub fn and_stop(mut self) -> Self {
        self.continue_ = false;
        self
    }

    /// Force sequential tool execution for the step.
    #[must_use]
    pub fn force_sequential() -> Self {
        Self {
            sequential: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deny_beats_ask_beats_allow() {
        use PermissionDecision::{Allow, Ask, Deny};
        assert_eq!(Allow.strongest(Ask), Ask);
        assert_eq!(Ask.strongest(Deny), Deny);
        assert_eq!(Deny.strongest(Allow), Deny);
        assert_eq!(Allow.strongest(Allow), Allow);
    }

    #[test]
    fn default_output_continues() {
        let out = HookOutput::observe();
        assert!(out.continue_);
        assert!(!out.retry);
        assert!(out.permission_decision.is_none());
    }

    #[test]
    fn continue_field_serializes_under_spec_name() {
        let encoded = serde_json::to_value(HookOutput::allow().and_stop()).unwrap();
        assert_eq!(encoded["continue"], false);

        let decoded: HookOutput = serde_json::from_value(json!({})).unwrap();
        assert!(decoded.continue_);
    }

    #[test]
    fn builders_set_single_fields() {
        assert!(HookOutput::retry_after_ms(50).retry);
        assert_eq!(HookOutput::retry_after_ms(50).retry_delay_ms, Some(50));
        assert_eq!(
            HookOutput::respond(json!("cached")).respond_with,
            Some(json!("cached"))
        );
        assert!(HookOutput::force_sequential().sequential);
    }
}
