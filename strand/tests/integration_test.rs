//! End-to-end scenarios driving the full run loop.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use strand::agent::{Agent, GenerateOptions};
use strand::checkpoint::{ApprovalResponse, InMemoryCheckpointStore};
use strand::context::{ContextConfig, ContextManager, SUMMARY_TAG, Summarizer, summary_tier};
use strand::error::{Error, Result};
use strand::hook::{HookEvent, HookOutput, HookRegistry, hook};
use strand::hook::builtins::retry_transient;
use strand::message::{ContentPart, Message, Role};
use strand::model::{FinishReason, ModelProvider, ModelResponse};
use strand::signal::Signal;
use strand::task::{
    BackgroundTask, InMemoryTaskStore, TaskManager, TaskStatus, TaskStore, recover_running_tasks,
};
use strand::tool::{Tool, ToolContext, ToolDefinition};
use strand::usage::Usage;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Provider replaying a fixed script of outcomes.
struct ScriptedProvider {
    script: StdMutex<Vec<Result<ModelResponse>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(mut script: Vec<Result<ModelResponse>>) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            script: StdMutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn text(text: &str) -> Result<ModelResponse> {
        Ok(
            ModelResponse::new(Message::assistant(text), FinishReason::Stop)
                .with_usage(Usage::new(10, 5)),
        )
    }

    fn tool_call(id: &str, name: &str, input: serde_json::Value) -> Result<ModelResponse> {
        let message = Message::with_parts(
            Role::Assistant,
            vec![ContentPart::ToolCall {
                id: id.into(),
                name: name.into(),
                input,
            }],
        );
        Ok(ModelResponse::new(message, FinishReason::ToolCalls).with_usage(Usage::new(10, 5)))
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn generate(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        _signal: &Signal,
    ) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(Error::model("script exhausted")))
    }
}

#[derive(Deserialize, JsonSchema)]
struct WriteArgs {
    path: String,
    content: String,
}

/// Writes a file into agent state.
struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    const NAME: &'static str = "write";
    type Args = WriteArgs;
    type Output = String;

    fn description(&self) -> String {
        "Write a file".into()
    }

    fn definition(&self) -> ToolDefinition {
        let schema = serde_json::to_value(schemars::schema_for!(WriteArgs)).unwrap();
        ToolDefinition::new(Self::NAME, self.description(), schema).with_write_access()
    }

    async fn run(&self, args: WriteArgs, ctx: &ToolContext) -> Result<String> {
        ctx.state.lock().await.write_file(&args.path, &args.content);
        Ok(format!("wrote {}", args.path))
    }
}

#[derive(Deserialize, JsonSchema)]
struct ResearchArgs {
    prompt: String,
}

/// A slow background tool.
struct ResearchTool;

#[async_trait]
impl Tool for ResearchTool {
    const NAME: &'static str = "research";
    type Args = ResearchArgs;
    type Output = String;

    fn description(&self) -> String {
        "Research a question out of band".into()
    }

    fn definition(&self) -> ToolDefinition {
        let schema = serde_json::to_value(schemars::schema_for!(ResearchArgs)).unwrap();
        ToolDefinition::new(Self::NAME, self.description(), schema).in_background()
    }

    async fn run(&self, _args: ResearchArgs, _ctx: &ToolContext) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok("42".into())
    }
}

fn ask_on_every_tool() -> HookRegistry {
    let mut hooks = HookRegistry::new();
    hooks.on(HookEvent::PreToolUse, hook(|_| async { Ok(HookOutput::ask()) }));
    hooks
}

// ---------------------------------------------------------------------------
// Approval round-trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approval_round_trip_applies_the_write() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("c1", "write", json!({"path": "hello.txt", "content": "hi"})),
        ScriptedProvider::text("created hello.txt"),
    ]);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let agent = Agent::builder()
        .provider(Arc::clone(&provider) as Arc<dyn ModelProvider>)
        .tool(Arc::new(WriteTool))
        .hooks(ask_on_every_tool())
        .checkpointer(checkpoints)
        .build()
        .unwrap();

    let first = agent
        .generate(GenerateOptions::prompt("create hello.txt with content 'hi'").with_thread("t1"))
        .await
        .unwrap();
    let interruption = first.as_interrupted().expect("should suspend on approval");
    assert_eq!(interruption.interrupt.request.tool_name, "write");
    assert_eq!(interruption.checkpoint_id, "t1");

    agent
        .respond_to_interrupt(&interruption.interrupt.id, ApprovalResponse::approve())
        .await
        .unwrap();

    let second = agent
        .generate(GenerateOptions::thread("t1"))
        .await
        .unwrap();
    let completion = second.as_complete().expect("should complete after approval");
    assert_eq!(completion.text, "created hello.txt");

    let state = agent.state();
    let state = state.lock().await;
    assert_eq!(state.read_file("hello.txt"), Some("hi"));
}

#[tokio::test]
async fn denied_tool_leaves_state_untouched() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("c1", "write", json!({"path": "hello.txt", "content": "hi"})),
        ScriptedProvider::text("understood, the write was denied"),
    ]);
    let agent = Agent::builder()
        .provider(provider as Arc<dyn ModelProvider>)
        .tool(Arc::new(WriteTool))
        .hooks(ask_on_every_tool())
        .checkpointer(Arc::new(InMemoryCheckpointStore::new()))
        .build()
        .unwrap();

    let first = agent
        .generate(GenerateOptions::prompt("create hello.txt").with_thread("t2"))
        .await
        .unwrap();
    let interruption = first.as_interrupted().unwrap();

    agent
        .respond_to_interrupt(&interruption.interrupt.id, ApprovalResponse::deny())
        .await
        .unwrap();

    let second = agent.generate(GenerateOptions::thread("t2")).await.unwrap();
    let completion = second.as_complete().unwrap();
    assert!(completion.text.contains("denied"));

    // The denial reached the model as a tool result.
    let denial = completion
        .tool_results
        .iter()
        .find(|o| o.id == "c1")
        .unwrap();
    assert!(denial.is_error);
    assert_eq!(denial.output["error"]["kind"], "permission_denied");

    let state = agent.state();
    assert!(state.lock().await.files.is_empty());
}

#[tokio::test]
async fn approved_resume_matches_an_uninterrupted_run() {
    let script = || {
        vec![
            ScriptedProvider::tool_call(
                "c1",
                "write",
                json!({"path": "same.txt", "content": "identical"}),
            ),
            ScriptedProvider::text("done"),
        ]
    };

    // Run A: no approval required.
    let agent_a = Agent::builder()
        .provider(ScriptedProvider::new(script()) as Arc<dyn ModelProvider>)
        .tool(Arc::new(WriteTool))
        .build()
        .unwrap();
    agent_a.generate("write it").await.unwrap();

    // Run B: interrupted, then approved.
    let agent_b = Agent::builder()
        .provider(ScriptedProvider::new(script()) as Arc<dyn ModelProvider>)
        .tool(Arc::new(WriteTool))
        .hooks(ask_on_every_tool())
        .checkpointer(Arc::new(InMemoryCheckpointStore::new()))
        .build()
        .unwrap();
    let first = agent_b
        .generate(GenerateOptions::prompt("write it").with_thread("t3"))
        .await
        .unwrap();
    let id = first.as_interrupted().unwrap().interrupt.id.clone();
    agent_b
        .respond_to_interrupt(&id, ApprovalResponse::approve())
        .await
        .unwrap();
    let second = agent_b.generate(GenerateOptions::thread("t3")).await.unwrap();
    assert!(second.is_complete());

    let state_a = agent_a.state();
    let state_b = agent_b.state();
    assert_eq!(
        state_a.lock().await.read_file("same.txt"),
        state_b.lock().await.read_file("same.txt"),
    );
}

// ---------------------------------------------------------------------------
// Compaction preserves pins
// ---------------------------------------------------------------------------

struct ShortSummarizer;

#[async_trait]
impl Summarizer for ShortSummarizer {
    async fn summarize(&self, _transcript: &str) -> Result<String> {
        Ok("earlier discussion, condensed".into())
    }
}

#[tokio::test]
async fn compaction_preserves_pins_and_recent_tail() {
    let manager = ContextManager::new(ContextConfig {
        max_tokens: 2000,
        token_threshold: 0.5,
        keep_message_count: 4,
        ..ContextConfig::default()
    });
    let summarizer: Arc<dyn Summarizer> = Arc::new(ShortSummarizer);

    let messages: Vec<Message> = (0..40)
        .map(|i| {
            let padding = "the conversation keeps going with plenty of detail about step".repeat(2);
            if i % 2 == 0 {
                Message::user(format!("{padding} {i}"))
            } else {
                Message::assistant(format!("{padding} {i}"))
            }
        })
        .collect();
    manager.pin(5, None);
    assert!(manager.is_pinned(5));

    let report = manager.process(messages.clone(), &summarizer).await;
    let compacted = report.messages;
    assert!(report.compaction.unwrap().error.is_none());

    // The pinned message appears verbatim.
    assert!(compacted.contains(&messages[5]));

    // Exactly one summary message, tagged.
    let summaries: Vec<&Message> = compacted
        .iter()
        .filter(|m| summary_tier(m).is_some())
        .collect();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].text().unwrap().starts_with(SUMMARY_TAG));

    // At most: one summary + pinned + the 4 most recent.
    assert!(compacted.len() <= 6);
    assert_eq!(compacted[compacted.len() - 4..], messages[36..]);

    // Token budget shrank.
    assert!(
        manager.budget(&compacted).current_tokens
            <= manager.budget(&messages).current_tokens
    );
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn background_task_drains_and_reinvokes() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("c1", "research", json!({"prompt": "what is the answer?"})),
        ScriptedProvider::text("working on it"),
        ScriptedProvider::text("The answer is 42."),
    ]);
    let tasks = Arc::new(TaskManager::new(Arc::new(InMemoryTaskStore::new())));
    let agent = Agent::builder()
        .provider(Arc::clone(&provider) as Arc<dyn ModelProvider>)
        .tool(Arc::new(ResearchTool))
        .task_manager(Arc::clone(&tasks))
        .build()
        .unwrap();

    let result = agent.generate("find the answer").await.unwrap();
    let completion = result.as_complete().unwrap();
    assert!(completion.text.contains("42"));
    assert_eq!(provider.calls(), 3);

    // The tool result carried the task id synchronously.
    let enqueue = completion
        .tool_results
        .iter()
        .find(|o| o.name == "research")
        .unwrap();
    assert!(enqueue.output["task_id"].is_string());

    // A follow-up user message carried the task result in.
    assert!(
        completion
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.text().is_some_and(|t| t.contains("42")))
    );
}

#[tokio::test]
async fn background_task_not_drained_when_disabled() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("c1", "research", json!({"prompt": "what is the answer?"})),
        ScriptedProvider::text("working on it"),
    ]);
    let tasks = Arc::new(TaskManager::new(Arc::new(InMemoryTaskStore::new())));
    let agent = Agent::builder()
        .provider(Arc::clone(&provider) as Arc<dyn ModelProvider>)
        .tool(Arc::new(ResearchTool))
        .task_manager(tasks)
        .build()
        .unwrap();

    let result = agent
        .generate(GenerateOptions::prompt("find the answer").wait_for_background_tasks(false))
        .await
        .unwrap();
    let completion = result.as_complete().unwrap();
    assert_eq!(completion.text, "working on it");
    assert_eq!(provider.calls(), 2);
}

// ---------------------------------------------------------------------------
// Retry on rate limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limited_call_retries_after_advertised_delay() {
    let provider = ScriptedProvider::new(vec![
        Err(Error::rate_limit("slow down", Some(Duration::from_millis(50)))),
        ScriptedProvider::text("recovered"),
    ]);
    let mut hooks = HookRegistry::new();
    hooks.on(HookEvent::PostGenerateFailure, retry_transient(1, 0));

    let agent = Agent::builder()
        .provider(Arc::clone(&provider) as Arc<dyn ModelProvider>)
        .hooks(hooks)
        .build()
        .unwrap();

    let started = Instant::now();
    let result = agent.generate("hello").await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.as_complete().unwrap().text, "recovered");
    assert_eq!(provider.calls(), 2);
    assert!(elapsed >= Duration::from_millis(50), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn non_retryable_failure_surfaces_without_retry() {
    let provider = ScriptedProvider::new(vec![Err(Error::validation("bad request"))]);
    let mut hooks = HookRegistry::new();
    hooks.on(HookEvent::PostGenerateFailure, retry_transient(3, 0));

    let agent = Agent::builder()
        .provider(Arc::clone(&provider) as Arc<dyn ModelProvider>)
        .hooks(hooks)
        .build()
        .unwrap();

    assert!(agent.generate("hello").await.is_err());
    assert_eq!(provider.calls(), 1);
}

// ---------------------------------------------------------------------------
// Recovery of interrupted tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restart_recovery_fails_running_tasks() {
    let store = InMemoryTaskStore::new();
    let mut orphan = BackgroundTask::new("research", "was running at crash");
    orphan.start().unwrap();
    let orphan_id = orphan.id.clone();
    store.save(&orphan).await.unwrap();

    let recovered = recover_running_tasks(&store).await.unwrap();
    assert_eq!(recovered, 1);

    let task = store.load(&orphan_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("interrupted-by-restart"));
}

// ---------------------------------------------------------------------------
// Tool-call/result bijection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_tool_call_gets_exactly_one_result() {
    let message = Message::with_parts(
        Role::Assistant,
        vec![
            ContentPart::ToolCall {
                id: "c1".into(),
                name: "write".into(),
                input: json!({"path": "a.txt", "content": "1"}),
            },
            ContentPart::ToolCall {
                id: "c2".into(),
                name: "missing_tool".into(),
                input: json!({}),
            },
        ],
    );
    let provider = ScriptedProvider::new(vec![
        Ok(ModelResponse::new(message, FinishReason::ToolCalls)),
        ScriptedProvider::text("all done"),
    ]);
    let agent = Agent::builder()
        .provider(provider as Arc<dyn ModelProvider>)
        .tool(Arc::new(WriteTool))
        .build()
        .unwrap();

    let result = agent.generate("go").await.unwrap();
    let completion = result.as_complete().unwrap();

    let call_ids: Vec<String> = completion
        .messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls())
        .map(|c| c.id)
        .collect();
    let result_ids: Vec<String> = completion
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .flat_map(|m| {
            m.tool_result_ids()
                .into_iter()
                .map(ToOwned::to_owned)
                .collect::<Vec<String>>()
        })
        .collect();

    assert_eq!(call_ids, result_ids);
    // The unknown tool produced an error result, in emission order.
    assert_eq!(completion.tool_results[1].name, "missing_tool");
    assert!(completion.tool_results[1].is_error);
}
