//! Tool invocation plumbing: validation, deadlines, truncation.
//!
//! Errors never escape an invocation; they are captured into the outcome
//! as an error payload so the model can see them and recover. Schema
//! validation failures are non-retryable.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{Instrument, info_span, warn};

use crate::error::{Error, Result};
use crate::message::ToolCall;

use super::DynTool;
use super::context::ToolContext;

/// The recorded outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutcome {
    /// The originating call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// The input the tool ran with (after hook modification).
    pub input: Value,
    /// Output payload; `{"error": {...}}` on failure.
    pub output: Value,
    /// Whether the output is an error payload.
    pub is_error: bool,
}

impl ToolCallOutcome {
    /// An outcome representing a captured failure.
    #[must_use]
    pub fn from_error(call: &ToolCall, error: &Error) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
            output: json!({ "error": error.to_wire() }),
            is_error: true,
        }
    }
}

/// Execute one tool call end to end.
///
/// Validates the input against the tool's schema, enforces the per-tool
/// deadline (falling back to `default_timeout`), honors cancellation,
/// and truncates oversized output. Failures are captured into the
/// outcome, never propagated.
pub async fn invoke(
    tool: &dyn DynTool,
    call: &ToolCall,
    ctx: &ToolContext,
    default_timeout: Duration,
) -> ToolCallOutcome {
    let definition = tool.definition();
    let span = info_span!(
        "tool",
        tool.name = %call.name,
        tool.id = %call.id,
        tool.success = tracing::field::Empty,
    );

    async {
        let result = run_checked(tool, call, ctx, default_timeout).await;
        tracing::Span::current().record("tool.success", result.is_ok());

        match result {
            Ok(output) => {
                let (output, _) = truncate_output(output, definition.max_output_size);
                ToolCallOutcome {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                    output,
                    is_error: false,
                }
            }
            Err(error) => {
                warn!(tool = %call.name, %error, "Tool invocation failed");
                ToolCallOutcome::from_error(call, &error)
            }
        }
    }
    .instrument(span)
    .await
}

async fn run_checked(
    tool: &dyn DynTool,
    call: &ToolCall,
    ctx: &ToolContext,
    default_timeout: Duration,
) -> Result<Value> {
    let definition = tool.definition();
    validate_input(&definition.input_schema, &call.input, &call.name)?;

    let deadline = definition.timeout.unwrap_or(default_timeout);
    let execution = tool.execute(call.input.clone(), ctx);

    tokio::select! {
        () = ctx.signal.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(deadline, execution) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(call.name.clone(), deadline)),
        },
    }
}

/// Validate `input` against the tool's advertised JSON schema.
fn validate_input(schema: &Value, input: &Value, tool_name: &str) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| Error::validation(format!("tool '{tool_name}' has a bad schema: {e}")))?;
    validator.validate(input).map_err(|e| {
        Error::validation(format!("input for '{tool_name}' failed validation: {e}"))
    })
}

/// Truncate string outputs beyond `max_size`, flagging the result.
fn truncate_output(output: Value, max_size: Option<usize>) -> (Value, bool) {
    let Some(max) = max_size else {
        return (output, false);
    };
    let text = match &output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.len() <= max {
        return (output, false);
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    (
        json!({ "output": &text[..cut], "truncated": true }),
        true,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tool::{Tool, ToolDefinition};
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct SleepArgs {
        millis: u64,
    }

    struct SleepTool {
        definition: ToolDefinition,
    }

    impl SleepTool {
        fn new() -> Self {
            let schema = serde_json::to_value(schemars::schema_for!(SleepArgs)).unwrap();
            Self {
                definition: ToolDefinition::new("sleep", "Wait then answer", schema),
            }
        }

        fn with_timeout(mut self, timeout: Duration) -> Self {
            self.definition = self.definition.with_timeout(timeout);
            self
        }

        fn with_cap(mut self, bytes: usize) -> Self {
            self.definition = self.definition.with_max_output_size(bytes);
            self
        }
    }

    #[async_trait]
    impl super::super::DynTool for SleepTool {
        fn definition(&self) -> ToolDefinition {
            self.definition.clone()
        }

        async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value> {
            let args: SleepArgs = serde_json::from_value(input)?;
            tokio::time::sleep(Duration::from_millis(args.millis)).await;
            Ok(Value::String("x".repeat(64)))
        }
    }

    fn call(input: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "sleep".into(),
            input,
        }
    }

    #[tokio::test]
    async fn successful_invocation() {
        let tool = SleepTool::new();
        let ctx = ToolContext::detached();
        let outcome = invoke(&tool, &call(json!({"millis": 0})), &ctx, Duration::from_secs(5)).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.output, Value::String("x".repeat(64)));
    }

    #[tokio::test]
    async fn schema_violation_is_captured_non_retryable() {
        let tool = SleepTool::new();
        let ctx = ToolContext::detached();
        let outcome = invoke(
            &tool,
            &call(json!({"millis": "soon"})),
            &ctx,
            Duration::from_secs(5),
        )
        .await;
        assert!(outcome.is_error);
        assert_eq!(outcome.output["error"]["kind"], "validation_error");
        assert_eq!(outcome.output["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn per_tool_timeout_beats_default() {
        let tool = SleepTool::new().with_timeout(Duration::from_millis(10));
        let ctx = ToolContext::detached();
        let outcome = invoke(
            &tool,
            &call(json!({"millis": 5000})),
            &ctx,
            Duration::from_secs(60),
        )
        .await;
        assert!(outcome.is_error);
        assert_eq!(outcome.output["error"]["kind"], "timeout");
        assert_eq!(outcome.output["error"]["retryable"], true);
    }

    #[tokio::test]
    async fn cancellation_is_captured() {
        let tool = SleepTool::new();
        let ctx = ToolContext::detached();
        ctx.signal.cancel();
        let outcome = invoke(
            &tool,
            &call(json!({"millis": 5000})),
            &ctx,
            Duration::from_secs(60),
        )
        .await;
        assert!(outcome.is_error);
        assert_eq!(outcome.output["error"]["kind"], "cancelled");
    }

    #[tokio::test]
    async fn oversized_output_is_truncated_and_flagged() {
        let tool = SleepTool::new().with_cap(16);
        let ctx = ToolContext::detached();
        let outcome = invoke(&tool, &call(json!({"millis": 0})), &ctx, Duration::from_secs(5)).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.output["truncated"], true);
        assert_eq!(outcome.output["output"].as_str().unwrap().len(), 16);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let (value, truncated) = truncate_output(Value::String("héllo wörld".repeat(4)), Some(5));
        assert!(truncated);
        assert!(value["output"].as_str().unwrap().len() <= 5);
    }
}
