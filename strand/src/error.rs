//! Error types for the strand runtime.
//!
//! Every error kind carries a `retryable` verdict, a stable machine code,
//! and structured metadata, and can be serialized to the wire shape
//! `{kind, message, retryable, metadata}` consumed by surfaces.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from the model provider.
    #[error("Model error: {message}")]
    Model {
        /// The underlying error message.
        message: String,
        /// Whether the provider classified the failure as transient
        /// (rate limit, timeout, 5xx).
        retryable: bool,
    },

    /// Error during tool execution.
    #[error("Tool '{tool_name}' failed: {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
        /// Whether the tool reported the failure as transient.
        retryable: bool,
    },

    /// An operation exceeded its deadline.
    #[error("'{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The provider rejected the request due to rate limiting.
    #[error("Rate limited: {message}")]
    RateLimit {
        /// The underlying error message.
        message: String,
        /// Server-advised delay before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The conversation no longer fits the model's context window.
    #[error("Context length exceeded: {message}")]
    ContextLength {
        /// The underlying error message.
        message: String,
    },

    /// Invalid input, configuration, or schema mismatch.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what failed to validate.
        message: String,
    },

    /// Error from an MCP plugin connection.
    #[error("MCP error in '{plugin}': {message}")]
    Mcp {
        /// The plugin that failed.
        plugin: String,
        /// The underlying error message.
        message: String,
        /// Whether reconnecting may succeed.
        retryable: bool,
    },

    /// An MCP tool rejected its input before execution.
    #[error("MCP input validation failed for '{tool_name}': {message}")]
    McpInputValidation {
        /// The namespaced MCP tool name.
        tool_name: String,
        /// Description of the schema mismatch.
        message: String,
    },

    /// A hook or permission mode denied the operation.
    #[error("Permission denied for '{tool_name}': {message}")]
    PermissionDenied {
        /// The tool the denial applies to.
        tool_name: String,
        /// The denial reason.
        message: String,
    },

    /// A guardrail blocked the request or response.
    #[error("Guardrail '{guardrail}' blocked: {message}")]
    GuardrailBlocked {
        /// Name of the guardrail that tripped.
        guardrail: String,
        /// The block reason.
        message: String,
    },

    /// The circuit breaker is open; outbound calls are halted.
    #[error("Circuit open; retry in {}ms", reset_in.as_millis())]
    CircuitOpen {
        /// Time until the breaker transitions to half-open.
        reset_in: Duration,
    },

    /// A checkpoint or task store operation failed.
    #[error("Store error: {message}")]
    Store {
        /// The underlying error message.
        message: String,
    },

    /// The caller cancelled the operation through its signal.
    #[error("Operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Create a non-retryable model error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a model error with an explicit retryable verdict.
    #[must_use]
    pub fn model_retryable(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable tool execution error.
    #[must_use]
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a timeout error for the given operation.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a rate limit error with an optional server-advised delay.
    #[must_use]
    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Create a context length error.
    #[must_use]
    pub fn context_length(message: impl Into<String>) -> Self {
        Self::ContextLength {
            message: message.into(),
        }
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a permission denial for a tool.
    #[must_use]
    pub fn permission_denied(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// Timeouts, rate limits, and context-length failures are retryable by
    /// default; context-length failures are recoverable through emergency
    /// compaction rather than a plain retry.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Model { retryable, .. }
            | Self::ToolExecution { retryable, .. }
            | Self::Mcp { retryable, .. } => *retryable,
            Self::Timeout { .. } | Self::RateLimit { .. } | Self::ContextLength { .. } => true,
            Self::Validation { .. }
            | Self::McpInputValidation { .. }
            | Self::PermissionDenied { .. }
            | Self::GuardrailBlocked { .. }
            | Self::CircuitOpen { .. }
            | Self::Store { .. }
            | Self::Cancelled => false,
        }
    }

    /// Stable machine code for this error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Model { .. } => "model_error",
            Self::ToolExecution { .. } => "tool_execution_error",
            Self::Timeout { .. } => "timeout",
            Self::RateLimit { .. } => "rate_limit",
            Self::ContextLength { .. } => "context_length",
            Self::Validation { .. } => "validation_error",
            Self::Mcp { .. } => "mcp_error",
            Self::McpInputValidation { .. } => "mcp_input_validation_error",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::GuardrailBlocked { .. } => "guardrail_blocked",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Store { .. } => "store_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Structured metadata for the wire shape.
    #[must_use]
    pub fn metadata(&self) -> Value {
        match self {
            Self::ToolExecution { tool_name, .. }
            | Self::McpInputValidation { tool_name, .. }
            | Self::PermissionDenied { tool_name, .. } => json!({ "tool_name": tool_name }),
            Self::Timeout {
                operation,
                timeout_ms,
            } => json!({ "operation": operation, "timeout_ms": timeout_ms }),
            Self::RateLimit { retry_after, .. } => {
                json!({ "retry_after_ms": retry_after.map(|d| d.as_millis() as u64) })
            }
            Self::Mcp { plugin, .. } => json!({ "plugin": plugin }),
            Self::GuardrailBlocked { guardrail, .. } => json!({ "guardrail": guardrail }),
            Self::CircuitOpen { reset_in } => json!({ "reset_in_ms": reset_in.as_millis() as u64 }),
            _ => Value::Null,
        }
    }

    /// Serialize to the `{kind, message, retryable, metadata}` wire shape.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        json!({
            "kind": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
            "metadata": self.metadata(),
        })
    }

    /// A short human sentence describing the failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Model { .. } => "The model request failed.".to_owned(),
            Self::ToolExecution { tool_name, .. } => {
                format!("The '{tool_name}' tool ran into a problem.")
            }
            Self::Timeout { operation, .. } => format!("'{operation}' took too long and was stopped."),
            Self::RateLimit { .. } => "The service is busy; please retry shortly.".to_owned(),
            Self::ContextLength { .. } => {
                "The conversation grew too large for the model.".to_owned()
            }
            Self::Validation { .. } => "The request was invalid.".to_owned(),
            Self::Mcp { plugin, .. } => format!("The '{plugin}' plugin is unavailable."),
            Self::McpInputValidation { tool_name, .. } => {
                format!("The '{tool_name}' tool rejected its input.")
            }
            Self::PermissionDenied { tool_name, .. } => {
                format!("Permission to run '{tool_name}' was denied.")
            }
            Self::GuardrailBlocked { .. } => "A safety guardrail blocked this request.".to_owned(),
            Self::CircuitOpen { .. } => {
                "Too many recent failures; requests are paused.".to_owned()
            }
            Self::Store { .. } => "Saved state could not be read or written.".to_owned(),
            Self::Cancelled => "The operation was cancelled.".to_owned(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn retryable_verdicts() {
        assert!(Error::timeout("tool", Duration::from_secs(5)).retryable());
        assert!(Error::rate_limit("slow down", None).retryable());
        assert!(Error::context_length("too big").retryable());
        assert!(Error::model_retryable("503").retryable());
        assert!(!Error::model("bad request").retryable());
        assert!(!Error::validation("missing prompt").retryable());
        assert!(!Error::permission_denied("write", "nope").retryable());
        assert!(!Error::Cancelled.retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::model("x").code(), "model_error");
        assert_eq!(Error::tool("t", "x").code(), "tool_execution_error");
        assert_eq!(
            Error::CircuitOpen {
                reset_in: Duration::from_millis(250)
            }
            .code(),
            "circuit_open"
        );
    }

    #[test]
    fn wire_shape_has_all_fields() {
        let wire = Error::rate_limit("busy", Some(Duration::from_millis(50))).to_wire();
        assert_eq!(wire["kind"], "rate_limit");
        assert_eq!(wire["retryable"], true);
        assert_eq!(wire["metadata"]["retry_after_ms"], 50);
        assert!(wire["message"].as_str().unwrap().contains("busy"));
    }

    #[test]
    fn tool_metadata_carries_tool_name() {
        let meta = Error::tool("grep", "boom").metadata();
        assert_eq!(meta["tool_name"], "grep");
    }

    #[test]
    fn user_messages_are_short_sentences() {
        let msg = Error::permission_denied("bash", "denied by hook").user_message();
        assert!(msg.contains("bash"));
        assert!(msg.ends_with('.'));
    }
}
