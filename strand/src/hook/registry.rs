//! Hook registration and dispatch.
//!
//! Hooks are plain async functions in a registry, grouped per event. A
//! group carries an optional [`Matcher`] (tool events only); groups run
//! in registration order and hooks within a group in insertion order.
//! Dispatch is sequential and awaits each hook; a hook error aborts the
//! remaining hooks and is surfaced to the caller, which reports it
//! through the corresponding failure event.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;

use super::event::{HookEvent, HookInput};
use super::matcher::Matcher;
use super::output::{HookOutput, PermissionDecision};

/// The future a hook callback returns.
pub type HookFuture = Pin<Box<dyn Future<Output = Result<HookOutput>> + Send>>;

/// A registered hook callback.
pub type HookFn = Arc<dyn Fn(HookInput) -> HookFuture + Send + Sync>;

/// Wrap an async closure as a [`HookFn`].
pub fn hook<F, Fut>(f: F) -> HookFn
where
    F: Fn(HookInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookOutput>> + Send + 'static,
{
    Arc::new(move |input| Box::pin(f(input)))
}

/// An ordered group of hooks behind an optional matcher.
#[derive(Clone)]
pub struct HookGroup {
    matcher: Option<Matcher>,
    hooks: Vec<HookFn>,
}

impl std::fmt::Debug for HookGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookGroup")
            .field("matcher", &self.matcher.as_ref().map(Matcher::pattern))
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl HookGroup {
    /// A group that runs for every dispatch of its event.
    #[must_use]
    pub fn new(hooks: Vec<HookFn>) -> Self {
        Self {
            matcher: None,
            hooks,
        }
    }

    /// A group gated on a tool-name matcher.
    #[must_use]
    pub fn matched(matcher: Matcher, hooks: Vec<HookFn>) -> Self {
        Self {
            matcher: Some(matcher),
            hooks,
        }
    }

    fn applies_to(&self, input: &HookInput) -> bool {
        match (&self.matcher, input.tool_name()) {
            (Some(matcher), Some(name)) => matcher.matches(name),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// The aggregated outcome of dispatching one event.
#[derive(Debug, Clone, Default)]
pub struct HookDispatch {
    /// Strongest permission decision, if any hook decided.
    pub decision: Option<PermissionDecision>,
    /// First synthetic result, if any hook short-circuited.
    pub respond_with: Option<Value>,
    /// Delay for the first retry request, if any hook asked for one.
    pub retry: Option<Duration>,
    /// Final forward input after the modification pipeline.
    pub modified_input: Option<Value>,
    /// Whether any hook forced sequential tool execution.
    pub sequential: bool,
    /// How many hooks ran.
    pub hooks_run: usize,
}

impl HookDispatch {
    /// The effective permission, falling back to `default` when no hook
    /// decided.
    #[must_use]
    pub fn permission(&self, default: PermissionDecision) -> PermissionDecision {
        self.decision.unwrap_or(default)
    }
}

/// Per-event hook registrations.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    groups: HashMap<HookEvent, Vec<HookGroup>>,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single unmatched hook for `event`.
    pub fn on(&mut self, event: HookEvent, callback: HookFn) -> &mut Self {
        self.add_group(event, HookGroup::new(vec![callback]))
    }

    /// Register a group of hooks gated on a tool-name pattern.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] for a malformed pattern.
    pub fn on_matched(
        &mut self,
        event: HookEvent,
        pattern: &str,
        hooks: Vec<HookFn>,
    ) -> Result<&mut Self> {
        let matcher = Matcher::new(pattern)?;
        Ok(self.add_group(event, HookGroup::matched(matcher, hooks)))
    }

    /// Append a group, preserving registration order.
    pub fn add_group(&mut self, event: HookEvent, group: HookGroup) -> &mut Self {
        self.groups.entry(event).or_default().push(group);
        self
    }

    /// Whether any group is registered for `event`.
    #[must_use]
    pub fn has_hooks(&self, event: HookEvent) -> bool {
        self.groups.get(&event).is_some_and(|g| !g.is_empty())
    }

    /// Dispatch `input` to every applicable hook, in order, aggregating
    /// decisions.
    ///
    /// Aggregation: permission is the strongest decision seen
    /// (`Deny > Ask > Allow`); the first `respond_with` wins; the first
    /// `retry` wins; `modified_input` pipelines so each hook observes its
    /// predecessors' output; `continue: false` skips the remaining hooks
    /// for this event only.
    ///
    /// # Errors
    ///
    /// Propagates the first hook error; remaining hooks are skipped. The
    /// caller reports the error through the matching failure event.
    pub async fn dispatch(&self, mut input: HookInput) -> Result<HookDispatch> {
        let mut outcome = HookDispatch::default();
        let Some(groups) = self.groups.get(&input.event()) else {
            return Ok(outcome);
        };

        'events: for group in groups {
            if !group.applies_to(&input) {
                continue;
            }
            for callback in &group.hooks {
                let output = callback(input.clone()).await?;
                outcome.hooks_run += 1;

                if let Some(decision) = output.permission_decision {
                    outcome.decision = Some(
                        outcome
                            .decision
                            .map_or(decision, |held| held.strongest(decision)),
                    );
                }
                if outcome.respond_with.is_none() {
                    outcome.respond_with = output.respond_with;
                }
                if outcome.retry.is_none() && output.retry {
                    outcome.retry =
                        Some(Duration::from_millis(output.retry_delay_ms.unwrap_or(0)));
                }
                outcome.sequential |= output.sequential;

                if let Some(modified) = output.modified_input {
                    apply_modified_input(&mut input, modified.clone());
                    outcome.modified_input = Some(modified);
                }
                if !output.continue_ {
                    break 'events;
                }
            }
        }

        Ok(outcome)
    }
}

/// Replace the forward input payload for events that carry one.
fn apply_modified_input(input: &mut HookInput, modified: Value) {
    match input {
        HookInput::PreToolUse { input: payload, .. }
        | HookInput::PostToolUse { input: payload, .. }
        | HookInput::PostToolUseFailure { input: payload, .. } => *payload = modified,
        _ => {}
    }
}
