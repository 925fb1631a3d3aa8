//! The agent: configuration, builder, and public entry points.
//!
//! An [`Agent`] owns its provider, tool set, hook registry, and optional
//! context manager, checkpointer, task manager, and circuit breaker.
//! [`Agent::generate`] drives a call to a terminal state;
//! [`Agent::stream`] yields the same run as a finite part stream;
//! [`Agent::respond_to_interrupt`] resolves a suspended approval so the
//! next `generate` on the thread can resume.

mod options;
mod permission;
mod result;
mod runner;
mod subagent;

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::Mutex;

use crate::checkpoint::{ApprovalResponse, CheckpointStore};
use crate::context::{ContextManager, Summarizer};
use crate::error::{Error, Result};
use crate::hook::{HookInput, HookRegistry};
use crate::model::{ModelProvider, StreamPart};
use crate::retry::CircuitBreaker;
use crate::state::AgentState;
use crate::task::TaskManager;
use crate::tool::{BoxedTool, ToolAccess, ToolRegistry};

pub use options::GenerateOptions;
pub use permission::PermissionMode;
pub use result::{Completion, GenerateResult, Interruption};
pub use subagent::{SubagentSpec, SubagentTool};

/// Default step cap per `generate` call.
const DEFAULT_MAX_STEPS: usize = 10;
/// Default per-tool execution deadline.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// An LLM agent: model, tools, hooks, and durable collaborators.
pub struct Agent {
    pub(crate) provider: Arc<dyn ModelProvider>,
    pub(crate) tools: ToolRegistry,
    pub(crate) access: ToolAccess,
    pub(crate) hooks: HookRegistry,
    pub(crate) permission_mode: PermissionMode,
    pub(crate) context: Option<Arc<ContextManager>>,
    pub(crate) summarizer: Option<Arc<dyn Summarizer>>,
    pub(crate) checkpoints: Option<Arc<dyn CheckpointStore>>,
    pub(crate) tasks: Option<Arc<TaskManager>>,
    pub(crate) breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) max_steps: usize,
    pub(crate) tool_timeout: Duration,
    pub(crate) checkpoint_every_step: bool,
    pub(crate) state: Arc<Mutex<AgentState>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("tools", &self.tools)
            .field("permission_mode", &self.permission_mode)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Start building an agent.
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    /// Drive one call to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty input or a suspended
    /// thread, and propagates model/store failures that survive the
    /// retry hooks.
    pub async fn generate(&self, options: impl Into<GenerateOptions>) -> Result<GenerateResult> {
        runner::run(self, options.into()).await
    }

    /// Drive one call as a finite stream of parts
    /// (`text-delta | tool-call | tool-result | finish | error`).
    pub fn stream(
        &self,
        options: impl Into<GenerateOptions>,
    ) -> impl Stream<Item = Result<StreamPart>> + Send + '_ {
        runner::run_streamed(self, options.into())
    }

    /// Attach a response to a pending interrupt anywhere in the
    /// checkpoint store. The next `generate` on the interrupt's thread
    /// resumes the suspended step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when no checkpointer is configured
    /// or the interrupt is unknown.
    pub async fn respond_to_interrupt(
        &self,
        interrupt_id: &str,
        response: ApprovalResponse,
    ) -> Result<()> {
        let store = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| Error::validation("no checkpointer configured"))?;

        for thread_id in store.list().await? {
            if let Some(mut checkpoint) = store.load(&thread_id).await?
                && checkpoint.find_interrupt(interrupt_id).is_some()
            {
                checkpoint.respond(interrupt_id, response)?;
                return store.save(&checkpoint).await;
            }
        }
        Err(Error::validation(format!(
            "unknown interrupt '{interrupt_id}'"
        )))
    }

    /// The agent's mutable state handle.
    #[must_use]
    pub fn state(&self) -> Arc<Mutex<AgentState>> {
        Arc::clone(&self.state)
    }

    /// The agent's task manager, if configured.
    #[must_use]
    pub fn tasks(&self) -> Option<&Arc<TaskManager>> {
        self.tasks.as_ref()
    }

    /// Register a tool at runtime, firing `ToolRegistered` (or
    /// `ToolLoadError` on rejection).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on a name collision.
    pub async fn register_tool(&mut self, tool: BoxedTool) -> Result<()> {
        let name = tool.definition().name;
        match self.tools.register(tool) {
            Ok(()) => {
                let _ = self
                    .hooks
                    .dispatch(HookInput::ToolRegistered {
                        tool_name: name,
                    })
                    .await;
                Ok(())
            }
            Err(error) => {
                let _ = self
                    .hooks
                    .dispatch(HookInput::ToolLoadError {
                        tool_name: name,
                        error: error.to_string(),
                    })
                    .await;
                Err(error)
            }
        }
    }

    /// Report a dropped MCP plugin connection to the hook pipeline.
    pub async fn notify_mcp_connection_failed(&self, plugin: &str, error: &str) {
        let _ = self
            .hooks
            .dispatch(HookInput::McpConnectionFailed {
                plugin: plugin.to_owned(),
                error: error.to_owned(),
            })
            .await;
    }

    /// Report a restored MCP plugin connection to the hook pipeline.
    pub async fn notify_mcp_connection_restored(&self, plugin: &str) {
        let _ = self
            .hooks
            .dispatch(HookInput::McpConnectionRestored {
                plugin: plugin.to_owned(),
            })
            .await;
    }
}

/// Builder for [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Arc<dyn ModelProvider>>,
    tools: Vec<BoxedTool>,
    mcp_tools: Vec<(String, BoxedTool)>,
    subagents: Vec<SubagentSpec>,
    access: ToolAccess,
    hooks: HookRegistry,
    permission_mode: Option<PermissionMode>,
    context: Option<Arc<ContextManager>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    tasks: Option<Arc<TaskManager>>,
    breaker: Option<Arc<CircuitBreaker>>,
    max_steps: Option<usize>,
    tool_timeout: Option<Duration>,
    checkpoint_every_step: bool,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("tools", &self.tools.len())
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    /// Set the model provider (required).
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Add a tool.
    #[must_use]
    pub fn tool(mut self, tool: BoxedTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add an MCP tool under the `mcp__<plugin>__<tool>` namespace.
    #[must_use]
    pub fn mcp_tool(mut self, plugin: impl Into<String>, tool: BoxedTool) -> Self {
        self.mcp_tools.push((plugin.into(), tool));
        self
    }

    /// Declare a subagent type, exposed as a background tool.
    #[must_use]
    pub fn subagent(mut self, spec: SubagentSpec) -> Self {
        self.subagents.push(spec);
        self
    }

    /// Restrict the tool set with allow/deny lists.
    #[must_use]
    pub fn access(mut self, access: ToolAccess) -> Self {
        self.access = access;
        self
    }

    /// Install the hook registry.
    #[must_use]
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the permission mode (default: accept all).
    #[must_use]
    pub const fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = Some(mode);
        self
    }

    /// Install a context manager and its summarizer.
    #[must_use]
    pub fn context(mut self, manager: Arc<ContextManager>, summarizer: Arc<dyn Summarizer>) -> Self {
        self.context = Some(manager);
        self.summarizer = Some(summarizer);
        self
    }

    /// Install a checkpoint store.
    #[must_use]
    pub fn checkpointer(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Install a background task manager.
    #[must_use]
    pub fn task_manager(mut self, manager: Arc<TaskManager>) -> Self {
        self.tasks = Some(manager);
        self
    }

    /// Guard model calls with a circuit breaker.
    #[must_use]
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Cap steps per `generate` call (default 10).
    #[must_use]
    pub const fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Default per-tool deadline (default 60s).
    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Persist a checkpoint after every step, not just at finish and
    /// interrupts.
    #[must_use]
    pub const fn checkpoint_every_step(mut self, enabled: bool) -> Self {
        self.checkpoint_every_step = enabled;
        self
    }

    /// Build the agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when no provider is set or tool
    /// names collide.
    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| Error::validation("agent has no provider configured"))?;

        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            tools.register(tool)?;
        }
        for (plugin, tool) in self.mcp_tools {
            tools.register_mcp(&plugin, tool)?;
        }
        for spec in self.subagents {
            tools.register(Arc::new(SubagentTool::new(spec, Arc::clone(&provider))))?;
        }

        Ok(Agent {
            provider,
            tools,
            access: self.access,
            hooks: self.hooks,
            permission_mode: self.permission_mode.unwrap_or(PermissionMode::AcceptAll),
            context: self.context,
            summarizer: self.summarizer,
            checkpoints: self.checkpoints,
            tasks: self.tasks,
            breaker: self.breaker,
            max_steps: self.max_steps.unwrap_or(DEFAULT_MAX_STEPS),
            tool_timeout: self.tool_timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT),
            checkpoint_every_step: self.checkpoint_every_step,
            state: Arc::new(Mutex::new(AgentState::new())),
        })
    }
}
