//! Tools: typed callables the model can invoke.
//!
//! [`Tool`] is the typed trait users implement; [`DynTool`] is its
//! object-safe counterpart used by the registry and run loop. Input
//! schemas come from `schemars` derives on the argument type and are
//! enforced at invocation time.

mod context;
mod definition;
mod invoke;
mod registry;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};

pub use context::ToolContext;
pub use definition::ToolDefinition;
pub use invoke::{ToolCallOutcome, invoke};
pub use registry::{ToolAccess, ToolRegistry};

/// The typed trait for implementing a tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;

    /// Argument type; its derived schema is advertised to the model.
    type Args: DeserializeOwned + JsonSchema + Send;

    /// Output type, serialized into the tool result.
    type Output: Serialize + Send;

    /// What the tool does, for the model.
    fn description(&self) -> String;

    /// The tool's declaration. Override to set flags (approval,
    /// background, write access, timeout, output cap).
    fn definition(&self) -> ToolDefinition {
        let schema = serde_json::to_value(schemars::schema_for!(Self::Args))
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        ToolDefinition::new(Self::NAME, self.description(), schema)
    }

    /// Execute the tool.
    async fn run(&self, args: Self::Args, ctx: &ToolContext) -> Result<Self::Output>;
}

/// Object-safe tool interface for dynamic dispatch.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// The tool's declaration.
    fn definition(&self) -> ToolDefinition;

    /// Execute with JSON input and output.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value>;
}

/// A shared dynamic tool.
pub type BoxedTool = Arc<dyn DynTool>;

#[async_trait]
impl<T: Tool> DynTool for T
where
    T::Output: 'static,
{
    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let args: T::Args = serde_json::from_value(input)
            .map_err(|e| Error::validation(format!("invalid input for '{}': {e}", T::NAME)))?;
        let output = self.run(args, ctx).await?;
        serde_json::to_value(output)
            .map_err(|e| Error::tool(T::NAME, format!("unserializable output: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    struct AddTool;

    #[async_trait]
    impl Tool for AddTool {
        const NAME: &'static str = "add";
        type Args = AddArgs;
        type Output = i64;

        fn description(&self) -> String {
            "Add two integers".into()
        }

        async fn run(&self, args: AddArgs, _ctx: &ToolContext) -> Result<i64> {
            Ok(args.a + args.b)
        }
    }

    #[test]
    fn definition_derives_schema_from_args() {
        let def = Tool::definition(&AddTool);
        assert_eq!(def.name, "add");
        let props = &def.input_schema["properties"];
        assert!(props.get("a").is_some());
        assert!(props.get("b").is_some());
    }

    #[tokio::test]
    async fn dyn_execute_round_trips_json() {
        let tool: BoxedTool = Arc::new(AddTool);
        let ctx = ToolContext::detached();
        let out = tool.execute(json!({"a": 2, "b": 3}), &ctx).await.unwrap();
        assert_eq!(out, json!(5));
    }

    #[tokio::test]
    async fn dyn_execute_rejects_mismatched_args() {
        let tool: BoxedTool = Arc::new(AddTool);
        let ctx = ToolContext::detached();
        let err = tool
            .execute(json!({"a": "two", "b": 3}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(!err.retryable());
    }
}
