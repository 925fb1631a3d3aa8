//! Subagents: child agents invoked as background tools.
//!
//! A subagent carries its own system prompt and runs against the parent's
//! provider. It receives a one-way context — a fork of the parent's file
//! state — and never a parent back-reference. On success the fork is
//! merged back (last-writer-wins on path collisions; todos are not
//! merged).

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::error::Result;
use crate::message::Message;
use crate::model::ModelProvider;
use crate::tool::{DynTool, ToolContext, ToolDefinition};

/// Declaration of a subagent type.
#[derive(Debug, Clone)]
pub struct SubagentSpec {
    /// The subagent type; doubles as the tool name.
    pub name: String,
    /// What the subagent is for, advertised to the model.
    pub description: String,
    /// The subagent's own system prompt.
    pub system_prompt: String,
}

impl SubagentSpec {
    /// Declare a subagent type.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SubagentArgs {
    /// The task handed to the subagent.
    prompt: String,
}

/// The background tool wrapping one subagent type.
pub struct SubagentTool {
    spec: SubagentSpec,
    provider: Arc<dyn ModelProvider>,
}

impl std::fmt::Debug for SubagentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentTool")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl SubagentTool {
    /// Wrap a subagent spec as a background tool on `provider`.
    #[must_use]
    pub fn new(spec: SubagentSpec, provider: Arc<dyn ModelProvider>) -> Self {
        Self { spec, provider }
    }
}

#[async_trait]
impl DynTool for SubagentTool {
    fn definition(&self) -> ToolDefinition {
        let schema = serde_json::to_value(schemars::schema_for!(SubagentArgs))
            .unwrap_or_else(|_| json!({"type": "object"}));
        ToolDefinition::new(&self.spec.name, &self.spec.description, schema).in_background()
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let args: SubagentArgs = serde_json::from_value(input)
            .map_err(|e| crate::Error::validation(format!("invalid subagent input: {e}")))?;

        info!(subagent = %self.spec.name, "Subagent run started");

        // One-way context: fork the parent's files; todos start empty.
        let fork = ctx.state.lock().await.fork();

        let messages = vec![
            Message::system(&self.spec.system_prompt),
            Message::user(&args.prompt),
        ];
        let response = self
            .provider
            .generate(&messages, &[], &ctx.signal)
            .await?;

        // Merge is one-way, on termination.
        let merged = ctx.state.lock().await.merge_subagent(fork);
        if !merged.is_empty() {
            info!(subagent = %self.spec.name, files = merged.len(), "Merged subagent files");
        }

        Ok(Value::String(
            response.message.text().unwrap_or_default(),
        ))
    }
}
