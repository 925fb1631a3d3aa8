//! The run loop: drive one `generate`/`stream` call to a terminal state.
//!
//! Per step: shape the context (compaction), fire `PreGenerate` hooks
//! (which may short-circuit), call the model, fan out tool calls with
//! per-call permission aggregation, and loop until the model stops with
//! no tool calls or a terminal condition is reached. Approval interrupts
//! suspend the run behind a checkpoint; background tools enqueue tasks
//! that are drained on the return path.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt as _;
use serde_json::{Value, json};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::checkpoint::{ApprovalRequest, Checkpoint, Interrupt};
use crate::error::{Error, Result};
use crate::hook::{HookDispatch, HookInput, PermissionDecision};
use crate::message::{ContentPart, Message, Role, ToolCall};
use crate::model::{FinishReason, ModelResponse, StreamPart};
use crate::signal::Signal;
use crate::task::{BackgroundTask, TaskStatus, format_task_completion, format_task_failure};
use crate::tool::{ToolCallOutcome, ToolContext, invoke};

use super::Agent;
use super::options::GenerateOptions;
use super::result::{Completion, GenerateResult, Interruption};

/// Mutable state accumulated over one `generate`/`stream` call.
pub(super) struct RunState {
    thread_id: Option<String>,
    signal: Signal,
    wait_for_background: bool,
    cancel_background: bool,
    max_steps: usize,
    messages: Vec<Message>,
    /// Completed steps along the thread (resumes from the checkpoint).
    step: u64,
    /// Model calls made by this invocation.
    steps_taken: usize,
    usage: crate::usage::Usage,
    tool_calls: Vec<ToolCall>,
    tool_results: Vec<ToolCallOutcome>,
    owned_tasks: Vec<String>,
    emergency_compacted: bool,
    resolved_interrupts: Vec<Interrupt>,
}

impl RunState {
    /// Load the checkpoint (if any), validate inputs, and assemble the
    /// starting conversation.
    pub(super) async fn init(agent: &Agent, options: &GenerateOptions) -> Result<Self> {
        options.validate()?;

        let mut messages = Vec::new();
        let mut step = 0;
        let mut resolved_interrupts = Vec::new();

        if let (Some(store), Some(thread_id)) = (&agent.checkpoints, &options.thread_id)
            && let Some(checkpoint) = store.load(thread_id).await?
        {
            if let Some(pending) = checkpoint.pending_interrupt() {
                return Err(Error::validation(format!(
                    "thread '{thread_id}' is suspended on interrupt '{}'; respond before generating",
                    pending.id
                )));
            }
            debug!(thread = %thread_id, step = checkpoint.step, "Resuming from checkpoint");
            messages = checkpoint.messages;
            step = checkpoint.step;
            resolved_interrupts = checkpoint.interrupts;
            *agent.state.lock().await = checkpoint.state;
        }

        if messages.is_empty() && options.prompt.is_none() && options.messages.is_none() {
            return Err(Error::validation(
                "thread has no history and no prompt or messages were provided",
            ));
        }
        if let Some(extra) = &options.messages {
            messages.extend(extra.iter().cloned());
        }
        if let Some(prompt) = &options.prompt
            && !prompt.is_empty()
        {
            messages.push(Message::user(prompt));
        }

        Ok(Self {
            thread_id: options.thread_id.clone(),
            signal: options.signal.clone().unwrap_or_default(),
            wait_for_background: options.wait_for_background_tasks.unwrap_or(true),
            cancel_background: options.cancel_background_tasks,
            max_steps: options.max_steps.unwrap_or(agent.max_steps),
            messages,
            step,
            steps_taken: 0,
            usage: crate::usage::Usage::zero(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            owned_tasks: Vec::new(),
            emergency_compacted: false,
            resolved_interrupts,
        })
    }
}

/// Entry point for [`Agent::generate`].
pub(super) async fn run(agent: &Agent, options: GenerateOptions) -> Result<GenerateResult> {
    let span = info_span!(
        "generate",
        thread = options.thread_id.as_deref().unwrap_or(""),
        steps = tracing::field::Empty,
        error = tracing::field::Empty,
    );
    run_inner(agent, options).instrument(span).await
}

async fn run_inner(agent: &Agent, options: GenerateOptions) -> Result<GenerateResult> {
    let mut state = RunState::init(agent, &options).await?;

    resume_partial_step(agent, &mut state).await?;

    loop {
        if state.signal.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if state.steps_taken >= state.max_steps {
            return finish(agent, &mut state, FinishReason::Length).await;
        }

        shape_context(agent, &mut state).await?;

        let outcome = model_step(agent, &mut state).await?;
        state.steps_taken += 1;

        let response = match outcome {
            ModelStep::ShortCircuit(value) => {
                state.messages.push(Message::assistant(synthetic_text(&value)));
                state.step += 1;
                return finish(agent, &mut state, FinishReason::Stop).await;
            }
            ModelStep::Response(response) => response,
        };

        if let Some(usage) = response.usage {
            state.usage += usage;
            if let Some(context) = &agent.context {
                context.note_reported_usage(usage);
            }
        }
        state.messages.push(response.message.clone());

        let calls = response.message.tool_calls();
        if calls.is_empty() {
            state.step += 1;
            dispatch_post_generate(agent, &state, &response).await;
            if drain_background(agent, &mut state).await? {
                continue;
            }
            return finish(agent, &mut state, response.finish_reason).await;
        }

        state.tool_calls.extend(calls.iter().cloned());
        match tool_phase(agent, &mut state, calls).await? {
            ToolPhase::Interrupted(interruption) => {
                info!(interrupt = %interruption.interrupt.id, "Run suspended on approval");
                return Ok(GenerateResult::Interrupted(interruption));
            }
            ToolPhase::Done => {}
        }
        state.step += 1;

        if agent.checkpoint_every_step {
            persist_checkpoint(agent, &state, Vec::new(), state.step).await?;
        }
    }
}

/// Entry point for [`Agent::stream`]. Finite; not restartable.
#[allow(tail_expr_drop_order)]
pub(super) fn run_streamed<'a>(
    agent: &'a Agent,
    options: GenerateOptions,
) -> impl futures::Stream<Item = Result<StreamPart>> + Send + 'a {
    async_stream::try_stream! {
        let mut state = RunState::init(agent, &options).await?;
        resume_partial_step(agent, &mut state).await?;

        loop {
            if state.signal.is_cancelled() {
                Err(Error::Cancelled)?;
            }
            if state.steps_taken >= state.max_steps {
                finish(agent, &mut state, FinishReason::Length).await?;
                yield StreamPart::Finish { reason: FinishReason::Length, usage: Some(state.usage) };
                return;
            }

            shape_context(agent, &mut state).await?;

            // PreGenerate (short-circuit yields the synthetic text).
            let pre = dispatch_pre_generate(agent, &state).await?;
            if let Some(value) = pre.respond_with {
                let text = synthetic_text(&value);
                state.messages.push(Message::assistant(text.clone()));
                state.step += 1;
                state.steps_taken += 1;
                finish(agent, &mut state, FinishReason::Stop).await?;
                yield StreamPart::TextDelta { delta: text };
                yield StreamPart::Finish { reason: FinishReason::Stop, usage: Some(state.usage) };
                return;
            }

            // Stream the model call, forwarding parts as they arrive.
            let definitions = agent.tools.definitions();
            if let Some(breaker) = &agent.breaker {
                breaker.admit()?;
            }
            let mut parts = agent
                .provider
                .stream(&state.messages, &definitions, &state.signal)
                .await
                .inspect_err(|_| {
                    if let Some(breaker) = &agent.breaker {
                        breaker.record_failure();
                    }
                })?;
            if let Some(breaker) = &agent.breaker {
                breaker.record_success();
            }
            state.steps_taken += 1;

            let mut text = String::new();
            let mut streamed_calls: Vec<ToolCall> = Vec::new();
            let mut finish_reason = FinishReason::Stop;
            let mut usage = None;
            while let Some(part) = parts.next().await {
                let part = part?;
                match &part {
                    StreamPart::TextDelta { delta } => {
                        text.push_str(delta);
                        yield part.clone();
                    }
                    StreamPart::ToolCall { id, name, input } => {
                        streamed_calls.push(ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        });
                        yield part.clone();
                    }
                    StreamPart::Finish { reason, usage: reported } => {
                        finish_reason = *reason;
                        usage = *reported;
                    }
                    StreamPart::ToolResult { .. } | StreamPart::Error { .. } => {}
                }
            }

            // Reconstruct the assistant message from accumulated parts.
            let mut content: Vec<ContentPart> = Vec::new();
            if !text.is_empty() {
                content.push(ContentPart::text(text.clone()));
            }
            for call in &streamed_calls {
                content.push(ContentPart::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
            }
            if let Some(usage) = usage {
                state.usage += usage;
                if let Some(context) = &agent.context {
                    context.note_reported_usage(usage);
                }
            }
            let message = Message::with_parts(Role::Assistant, content);
            state.messages.push(message.clone());

            if streamed_calls.is_empty() {
                state.step += 1;
                let response = ModelResponse::new(message, finish_reason);
                dispatch_post_generate(agent, &state, &response).await;
                if drain_background(agent, &mut state).await? {
                    continue;
                }
                finish(agent, &mut state, finish_reason).await?;
                yield StreamPart::Finish { reason: finish_reason, usage: Some(state.usage) };
                return;
            }

            state.tool_calls.extend(streamed_calls.iter().cloned());
            let before = state.tool_results.len();
            match tool_phase(agent, &mut state, streamed_calls).await? {
                ToolPhase::Interrupted(interruption) => {
                    yield StreamPart::Error {
                        error: json!({
                            "kind": "interrupted",
                            "message": "tool approval required",
                            "interrupt_id": interruption.interrupt.id,
                            "checkpoint_id": interruption.checkpoint_id,
                        }),
                    };
                    return;
                }
                ToolPhase::Done => {
                    for outcome in &state.tool_results[before..] {
                        yield StreamPart::ToolResult {
                            id: outcome.id.clone(),
                            name: outcome.name.clone(),
                            output: outcome.output.clone(),
                        };
                    }
                }
            }
            state.step += 1;

            if agent.checkpoint_every_step {
                persist_checkpoint(agent, &state, Vec::new(), state.step).await?;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Context shaping
// ---------------------------------------------------------------------------

async fn shape_context(agent: &Agent, state: &mut RunState) -> Result<()> {
    let (Some(context), Some(summarizer)) = (&agent.context, &agent.summarizer) else {
        return Ok(());
    };

    if let Some(reason) = context.should_compact(&state.messages) {
        let budget = context.budget(&state.messages);
        dispatch_observer(
            agent,
            HookInput::PreCompact {
                reason,
                current_tokens: budget.current_tokens,
                max_tokens: budget.max_tokens,
            },
        )
        .await;
    }

    let report = context
        .process(std::mem::take(&mut state.messages), summarizer)
        .await;
    state.messages = report.messages;

    if let Some(event) = report.compaction {
        dispatch_observer(
            agent,
            HookInput::PostCompact {
                before_tokens: event.before_tokens,
                after_tokens: event.after_tokens,
                error: event.error,
            },
        )
        .await;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Model step (PRE_GEN + MODEL_CALL + retry)
// ---------------------------------------------------------------------------

enum ModelStep {
    Response(ModelResponse),
    ShortCircuit(Value),
}

async fn dispatch_pre_generate(agent: &Agent, state: &RunState) -> Result<HookDispatch> {
    match agent
        .hooks
        .dispatch(HookInput::PreGenerate {
            messages: state.messages.clone(),
        })
        .await
    {
        Ok(dispatch) => Ok(dispatch),
        Err(error) => {
            report_generate_failure(agent, &error, "preGenerate").await;
            Err(error)
        }
    }
}

async fn model_step(agent: &Agent, state: &mut RunState) -> Result<ModelStep> {
    loop {
        if state.signal.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let pre = dispatch_pre_generate(agent, state).await?;
        if let Some(value) = pre.respond_with {
            return Ok(ModelStep::ShortCircuit(value));
        }

        if let Some(breaker) = &agent.breaker {
            breaker.admit()?;
        }

        let definitions = agent.tools.definitions();
        let result = tokio::select! {
            () = state.signal.cancelled() => Err(Error::Cancelled),
            result = agent.provider.generate(&state.messages, &definitions, &state.signal) => result,
        };

        match result {
            Ok(response) => {
                if let Some(breaker) = &agent.breaker {
                    breaker.record_success();
                }
                return Ok(ModelStep::Response(response));
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(error) => {
                if let Some(breaker) = &agent.breaker {
                    breaker.record_failure();
                }

                // One emergency compaction per request for context-length
                // failures, then one retry.
                if matches!(error, Error::ContextLength { .. })
                    && !state.emergency_compacted
                    && agent.checkpoints.is_some()
                    && let Some(context) = &agent.context
                    && context.config().enable_error_fallback
                {
                    warn!("Context length exceeded; compacting and retrying once");
                    context.note_context_length_error();
                    state.emergency_compacted = true;
                    shape_context(agent, state).await?;
                    continue;
                }

                let dispatch = report_generate_failure(agent, &error, "model").await;
                if let Some(delay) = dispatch.retry {
                    debug!(delay_ms = delay.as_millis() as u64, "Retrying model call");
                    sleep_cancellable(&state.signal, delay).await?;
                    continue;
                }
                tracing::Span::current().record("error", tracing::field::display(&error));
                return Err(error);
            }
        }
    }
}

/// Fire `PostGenerateFailure`; a failing failure-hook is logged, never
/// propagated.
async fn report_generate_failure(agent: &Agent, error: &Error, origin: &str) -> HookDispatch {
    match agent
        .hooks
        .dispatch(HookInput::PostGenerateFailure {
            error: error.to_wire(),
            origin: origin.to_owned(),
        })
        .await
    {
        Ok(dispatch) => dispatch,
        Err(hook_error) => {
            warn!(%hook_error, "PostGenerateFailure hook failed");
            HookDispatch::default()
        }
    }
}

async fn dispatch_post_generate(agent: &Agent, state: &RunState, response: &ModelResponse) {
    let input = HookInput::PostGenerate {
        text: response.message.text().unwrap_or_default(),
        finish_reason: response.finish_reason,
        usage: state.usage,
    };
    if let Err(error) = agent.hooks.dispatch(input).await {
        report_generate_failure(agent, &error, "postGenerate").await;
    }
}

/// Fire an observer-only event (compaction, MCP, registration).
async fn dispatch_observer(agent: &Agent, input: HookInput) {
    let event = input.event();
    if let Err(error) = agent.hooks.dispatch(input).await {
        report_generate_failure(agent, &error, event.as_str()).await;
    }
}

async fn sleep_cancellable(signal: &Signal, delay: Duration) -> Result<()> {
    tokio::select! {
        () = signal.cancelled() => Err(Error::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tool phase
// ---------------------------------------------------------------------------

enum ToolPhase {
    Done,
    Interrupted(Interruption),
}

enum PlannedAction {
    Execute,
    Respond(Value),
    Deny(String),
    Missing,
    Ask,
    Fail(Error),
}

struct PlannedCall {
    call: ToolCall,
    action: PlannedAction,
}

async fn tool_phase(agent: &Agent, state: &mut RunState, calls: Vec<ToolCall>) -> Result<ToolPhase> {
    // Aggregation is computed per-call before any tool executes.
    let mut sequential = false;
    let mut planned = Vec::with_capacity(calls.len());
    for call in calls {
        planned.push(plan_call(agent, call, &mut sequential).await?);
    }

    if let Some(asked) = planned
        .iter()
        .find(|plan| matches!(plan.action, PlannedAction::Ask))
    {
        let interruption = raise_interrupt(agent, state, &asked.call).await?;
        return Ok(ToolPhase::Interrupted(interruption));
    }

    let ctx = ToolContext::new(
        state.signal.clone(),
        state.thread_id.clone(),
        std::sync::Arc::clone(&agent.state),
    );

    // Execute concurrently unless a hook forced sequential execution;
    // either way results keep the model's emission order.
    let mut results = Vec::with_capacity(planned.len());
    if sequential {
        for plan in planned {
            results.push(run_planned(agent, &ctx, plan).await);
        }
    } else {
        results = futures::future::join_all(
            planned
                .into_iter()
                .map(|plan| run_planned(agent, &ctx, plan)),
        )
        .await;
    }

    let mut outcomes = Vec::with_capacity(results.len());
    for (outcome, task_id) in results {
        if let Some(task_id) = task_id {
            state.owned_tasks.push(task_id);
        }
        outcomes.push(outcome);
    }
    inject_results(state, outcomes);
    Ok(ToolPhase::Done)
}

async fn plan_call(agent: &Agent, mut call: ToolCall, sequential: &mut bool) -> Result<PlannedCall> {
    if !agent.access.permits(&call.name) {
        return Ok(PlannedCall {
            action: PlannedAction::Deny("denied by tool access policy".to_owned()),
            call,
        });
    }
    let Some(tool) = agent.tools.get(&call.name) else {
        return Ok(PlannedCall {
            action: PlannedAction::Missing,
            call,
        });
    };
    let definition = tool.definition();
    let default = if definition.approval_required {
        PermissionDecision::Ask
    } else {
        agent.permission_mode.default_decision(&definition)
    };

    let dispatch = match agent
        .hooks
        .dispatch(HookInput::PreToolUse {
            tool_name: call.name.clone(),
            tool_call_id: call.id.clone(),
            input: call.input.clone(),
        })
        .await
    {
        Ok(dispatch) => dispatch,
        Err(error) => {
            report_tool_failure(agent, &call, &error, "preToolUse").await;
            // A hook-produced permission denial is the generation's
            // error, not a tool result.
            if matches!(error, Error::PermissionDenied { .. }) {
                return Err(error);
            }
            return Ok(PlannedCall {
                action: PlannedAction::Fail(error),
                call,
            });
        }
    };

    *sequential |= dispatch.sequential;
    if let Some(ref modified) = dispatch.modified_input {
        call.input = modified.clone();
    }
    if let Some(value) = dispatch.respond_with {
        return Ok(PlannedCall {
            action: PlannedAction::Respond(value),
            call,
        });
    }
    let action = match dispatch.permission(default) {
        PermissionDecision::Allow => PlannedAction::Execute,
        PermissionDecision::Deny => PlannedAction::Deny("denied by hook".to_owned()),
        PermissionDecision::Ask => PlannedAction::Ask,
    };
    Ok(PlannedCall { action, call })
}

async fn run_planned(
    agent: &Agent,
    ctx: &ToolContext,
    plan: PlannedCall,
) -> (ToolCallOutcome, Option<String>) {
    match plan.action {
        PlannedAction::Respond(value) => {
            let outcome = ToolCallOutcome {
                id: plan.call.id.clone(),
                name: plan.call.name.clone(),
                input: plan.call.input,
                output: value,
                is_error: false,
            };
            dispatch_post_tool(agent, &outcome).await;
            (outcome, None)
        }
        PlannedAction::Deny(reason) => (
            ToolCallOutcome::from_error(
                &plan.call,
                &Error::permission_denied(&plan.call.name, reason),
            ),
            None,
        ),
        PlannedAction::Missing => (
            ToolCallOutcome::from_error(
                &plan.call,
                &Error::tool(&plan.call.name, "tool not found"),
            ),
            None,
        ),
        PlannedAction::Fail(error) => (ToolCallOutcome::from_error(&plan.call, &error), None),
        PlannedAction::Execute => execute_call(agent, ctx, plan.call).await,
        // Asks are resolved before execution.
        PlannedAction::Ask => (
            ToolCallOutcome::from_error(
                &plan.call,
                &Error::permission_denied(&plan.call.name, "approval unresolved"),
            ),
            None,
        ),
    }
}

/// Execute one allowed call: background tools enqueue a task and return
/// its id synchronously; foreground tools run through the invocation
/// plumbing with post-hooks and hook-driven retry.
async fn execute_call(
    agent: &Agent,
    ctx: &ToolContext,
    call: ToolCall,
) -> (ToolCallOutcome, Option<String>) {
    let Some(tool) = agent.tools.get(&call.name) else {
        return (
            ToolCallOutcome::from_error(&call, &Error::tool(&call.name, "tool not found")),
            None,
        );
    };
    let definition = tool.definition();

    if definition.background && agent.tasks.is_some() {
        return enqueue_background(agent, ctx, &call).await;
    }

    loop {
        let outcome = invoke(tool.as_ref(), &call, ctx, agent.tool_timeout).await;
        if !outcome.is_error {
            dispatch_post_tool(agent, &outcome).await;
            return (outcome, None);
        }

        let dispatch = match agent
            .hooks
            .dispatch(HookInput::PostToolUseFailure {
                tool_name: outcome.name.clone(),
                tool_call_id: outcome.id.clone(),
                input: outcome.input.clone(),
                error: outcome.output.get("error").cloned().unwrap_or(Value::Null),
                origin: "tool".to_owned(),
            })
            .await
        {
            Ok(dispatch) => dispatch,
            Err(hook_error) => {
                warn!(%hook_error, "PostToolUseFailure hook failed");
                return (outcome, None);
            }
        };

        let Some(delay) = dispatch.retry else {
            return (outcome, None);
        };
        debug!(tool = %call.name, delay_ms = delay.as_millis() as u64, "Retrying tool call");
        if sleep_cancellable(&ctx.signal, delay).await.is_err() {
            return (outcome, None);
        }
    }
}

async fn enqueue_background(
    agent: &Agent,
    ctx: &ToolContext,
    call: &ToolCall,
) -> (ToolCallOutcome, Option<String>) {
    let Some(manager) = &agent.tasks else {
        return (
            ToolCallOutcome::from_error(
                call,
                &Error::tool(&call.name, "background tool without a task manager"),
            ),
            None,
        );
    };

    let description = call
        .input
        .get("prompt")
        .or_else(|| call.input.get("description"))
        .and_then(Value::as_str)
        .unwrap_or(&call.name)
        .to_owned();

    let mut task = BackgroundTask::new(&call.name, description);
    if let Some(thread_id) = &ctx.thread_id {
        task = task.with_parent_checkpoint(thread_id.clone());
    }
    let task = match manager.create(task).await {
        Ok(task) => task,
        Err(error) => return (ToolCallOutcome::from_error(call, &error), None),
    };

    let tool = std::sync::Arc::clone(agent.tools.get(&call.name).expect("checked above"));
    let input = call.input.clone();
    let child_ctx = ToolContext::new(
        ctx.signal.child(),
        ctx.thread_id.clone(),
        std::sync::Arc::clone(&ctx.state),
    );
    let spawned = manager
        .spawn(&task.id, async move {
            tool.execute(input, &child_ctx).await.map(|value| match value {
                Value::String(text) => text,
                other => other.to_string(),
            })
        })
        .await;
    if let Err(error) = spawned {
        return (ToolCallOutcome::from_error(call, &error), None);
    }

    info!(tool = %call.name, task = %task.id, "Enqueued background task");
    let outcome = ToolCallOutcome {
        id: call.id.clone(),
        name: call.name.clone(),
        input: call.input.clone(),
        output: json!({ "task_id": task.id, "status": "pending" }),
        is_error: false,
    };
    (outcome, Some(task.id))
}

async fn dispatch_post_tool(agent: &Agent, outcome: &ToolCallOutcome) {
    let input = HookInput::PostToolUse {
        tool_name: outcome.name.clone(),
        tool_call_id: outcome.id.clone(),
        input: outcome.input.clone(),
        output: outcome.output.clone(),
    };
    if let Err(error) = agent.hooks.dispatch(input).await {
        let call = ToolCall {
            id: outcome.id.clone(),
            name: outcome.name.clone(),
            input: outcome.input.clone(),
        };
        report_tool_failure(agent, &call, &error, "postToolUse").await;
    }
}

/// Fire `PostToolUseFailure` preserving the event that failed.
async fn report_tool_failure(agent: &Agent, call: &ToolCall, error: &Error, origin: &str) {
    let input = HookInput::PostToolUseFailure {
        tool_name: call.name.clone(),
        tool_call_id: call.id.clone(),
        input: call.input.clone(),
        error: error.to_wire(),
        origin: origin.to_owned(),
    };
    if let Err(hook_error) = agent.hooks.dispatch(input).await {
        warn!(%hook_error, "PostToolUseFailure hook failed");
    }
}

fn inject_results(state: &mut RunState, outcomes: Vec<ToolCallOutcome>) {
    if outcomes.is_empty() {
        return;
    }
    let parts = outcomes
        .iter()
        .map(|outcome| ContentPart::ToolResult {
            id: outcome.id.clone(),
            name: outcome.name.clone(),
            output: outcome.output.clone(),
        })
        .collect();
    state.messages.push(Message::with_parts(Role::Tool, parts));
    state.tool_results.extend(outcomes);
}

// ---------------------------------------------------------------------------
// Interrupts and resume
// ---------------------------------------------------------------------------

async fn raise_interrupt(
    agent: &Agent,
    state: &mut RunState,
    call: &ToolCall,
) -> Result<Interruption> {
    if agent.checkpoints.is_none() {
        return Err(Error::validation(
            "tool approval required but no checkpointer is configured",
        ));
    }
    let thread_id = state
        .thread_id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();

    let interrupt = Interrupt::approval(
        &thread_id,
        ApprovalRequest {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args: call.input.clone(),
            step: state.step + 1,
        },
    );
    persist_checkpoint(agent, state, vec![interrupt.clone()], state.step + 1).await?;

    Ok(Interruption {
        interrupt,
        messages: state.messages.clone(),
        checkpoint_id: thread_id,
    })
}

/// Complete a step left partially executed by an interrupt: replay only
/// the calls that never produced results, resolving the responded
/// approval (approve executes, deny injects a synthetic denial result).
async fn resume_partial_step(agent: &Agent, state: &mut RunState) -> Result<()> {
    let Some(assistant_index) = state
        .messages
        .iter()
        .rposition(|m| m.role == Role::Assistant)
    else {
        return Ok(());
    };
    let calls = state.messages[assistant_index].tool_calls();
    if calls.is_empty() {
        return Ok(());
    }

    let resolved: HashSet<String> = state.messages[assistant_index + 1..]
        .iter()
        .flat_map(|m| m.tool_result_ids())
        .map(ToOwned::to_owned)
        .collect();
    let pending: Vec<ToolCall> = calls
        .into_iter()
        .filter(|call| !resolved.contains(&call.id))
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    debug!(calls = pending.len(), "Resuming partially executed step");
    let ctx = ToolContext::new(
        state.signal.clone(),
        state.thread_id.clone(),
        std::sync::Arc::clone(&agent.state),
    );

    let mut outcomes = Vec::with_capacity(pending.len());
    for mut call in pending {
        let response = state
            .resolved_interrupts
            .iter()
            .find(|i| i.request.tool_call_id == call.id)
            .and_then(|i| i.response.clone());

        match response {
            Some(response) if !response.approved => {
                outcomes.push(ToolCallOutcome::from_error(
                    &call,
                    &Error::permission_denied(&call.name, "denied by user"),
                ));
            }
            Some(response) => {
                if let Some(args) = response.modified_args {
                    call.input = args;
                }
                let (outcome, task_id) = execute_call(agent, &ctx, call).await;
                if let Some(task_id) = task_id {
                    state.owned_tasks.push(task_id);
                }
                outcomes.push(outcome);
            }
            None => {
                // Never produced a result and was not under approval:
                // replay it.
                let (outcome, task_id) = execute_call(agent, &ctx, call).await;
                if let Some(task_id) = task_id {
                    state.owned_tasks.push(task_id);
                }
                outcomes.push(outcome);
            }
        }
    }
    state.tool_calls.extend(
        state.messages[assistant_index].tool_calls(),
    );
    inject_results(state, outcomes);
    Ok(())
}

// ---------------------------------------------------------------------------
// Background drain and completion
// ---------------------------------------------------------------------------

/// Wait for owned background tasks and inject their results as user
/// messages. Killed tasks are silent. Returns whether a follow-up
/// generation is needed.
async fn drain_background(agent: &Agent, state: &mut RunState) -> Result<bool> {
    if state.owned_tasks.is_empty() {
        return Ok(false);
    }
    let Some(manager) = &agent.tasks else {
        return Ok(false);
    };
    if !state.wait_for_background {
        state.owned_tasks.clear();
        return Ok(false);
    }

    let ids = std::mem::take(&mut state.owned_tasks);
    let mut injected = false;
    for id in ids {
        let task = tokio::select! {
            () = state.signal.cancelled() => {
                if state.cancel_background {
                    let _ = manager.kill(&id).await;
                }
                return Err(Error::Cancelled);
            }
            task = manager.wait(&id) => task?,
        };
        match task.status {
            TaskStatus::Completed => {
                state.messages.push(Message::user(format_task_completion(&task)));
                injected = true;
            }
            TaskStatus::Failed => {
                state.messages.push(Message::user(format_task_failure(&task)));
                injected = true;
            }
            // Killed tasks produce no follow-up.
            TaskStatus::Killed | TaskStatus::Pending | TaskStatus::Running => {}
        }
    }
    Ok(injected)
}

async fn finish(
    agent: &Agent,
    state: &mut RunState,
    finish_reason: FinishReason,
) -> Result<GenerateResult> {
    persist_checkpoint(agent, state, Vec::new(), state.step).await?;
    tracing::Span::current().record("steps", state.steps_taken);

    let text = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .and_then(Message::text)
        .unwrap_or_default();

    info!(
        steps = state.steps_taken,
        input_tokens = state.usage.input_tokens,
        output_tokens = state.usage.output_tokens,
        "Run completed",
    );

    Ok(GenerateResult::Complete(Completion {
        text,
        messages: std::mem::take(&mut state.messages),
        finish_reason,
        usage: state.usage,
        tool_calls: std::mem::take(&mut state.tool_calls),
        tool_results: std::mem::take(&mut state.tool_results),
    }))
}

async fn persist_checkpoint(
    agent: &Agent,
    state: &RunState,
    new_interrupts: Vec<Interrupt>,
    step: u64,
) -> Result<()> {
    let (Some(store), Some(thread_id)) = (&agent.checkpoints, &state.thread_id) else {
        return Ok(());
    };

    let created_at = store
        .load(thread_id)
        .await?
        .map_or_else(Utc::now, |cp| cp.created_at);
    let mut interrupts = state.resolved_interrupts.clone();
    interrupts.extend(new_interrupts);

    let checkpoint = Checkpoint {
        thread_id: thread_id.clone(),
        step,
        messages: state.messages.clone(),
        state: agent.state.lock().await.clone(),
        interrupts,
        created_at,
        updated_at: Utc::now(),
    };
    store.save(&checkpoint).await
}

fn synthetic_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
