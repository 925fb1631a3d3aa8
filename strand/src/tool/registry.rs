//! The active tool set: registration, namespacing, and access lists.

use indexmap::IndexMap;
use serde_json::Value;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::context::ToolContext;
use super::definition::ToolDefinition;
use super::{BoxedTool, DynTool};

/// Wraps an MCP tool under its namespaced name.
struct NamespacedTool {
    inner: BoxedTool,
    name: String,
}

#[async_trait]
impl DynTool for NamespacedTool {
    fn definition(&self) -> ToolDefinition {
        let mut def = self.inner.definition();
        def.name.clone_from(&self.name);
        def
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        self.inner.execute(input, ctx).await
    }
}

/// The tools available to one agent, keyed by unique name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, BoxedTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its declared name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the name is already taken.
    pub fn register(&mut self, tool: BoxedTool) -> Result<()> {
        let name = tool.definition().name;
        if self.tools.contains_key(&name) {
            return Err(Error::validation(format!(
                "tool '{name}' is already registered"
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Register an MCP tool under `mcp__<plugin>__<tool>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the namespaced name collides.
    pub fn register_mcp(&mut self, plugin: &str, tool: BoxedTool) -> Result<String> {
        let name = format!("mcp__{plugin}__{}", tool.definition().name);
        self.register(std::sync::Arc::new(NamespacedTool {
            inner: tool,
            name: name.clone(),
        }))?;
        Ok(name)
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    /// Declarations of every registered tool, in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Tool-level allow/deny lists, evaluated before hooks.
#[derive(Debug, Clone, Default)]
pub struct ToolAccess {
    /// When set, only these names are permitted.
    pub allow: Option<Vec<String>>,
    /// Names that are always refused.
    pub deny: Vec<String>,
}

impl ToolAccess {
    /// Unrestricted access.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Restrict to an allowlist.
    #[must_use]
    pub fn allow_only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allow: Some(names.into_iter().map(Into::into).collect()),
            deny: Vec::new(),
        }
    }

    /// Add denied names.
    #[must_use]
    pub fn deny(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deny.extend(names.into_iter().map(Into::into));
        self
    }

    /// Whether `name` passes the lists. Deny wins over allow.
    #[must_use]
    pub fn permits(&self, name: &str) -> bool {
        if self.deny.iter().any(|d| d == name) {
            return false;
        }
        self.allow
            .as_ref()
            .is_none_or(|allow| allow.iter().any(|a| a == name))
    }
}
