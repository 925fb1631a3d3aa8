//! Model provider trait and response types.
//!
//! The runtime consumes providers through [`ModelProvider`]; concrete
//! adapters (HTTP clients, local inference, mocks) live outside the core.
//! Usage must surface input, output, and total tokens; rate-limit headers
//! are forwarded verbatim and parsed opportunistically by the caller.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;
use crate::signal::Signal;
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced a complete answer.
    Stop,
    /// A length limit was hit (model output cap or the run's step cap).
    Length,
    /// The model stopped to call tools.
    ToolCalls,
    /// Output was suppressed by a content filter.
    ContentFilter,
    /// The call ended in an error.
    Error,
}

/// A complete response from one model call.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// The assistant message (text and/or tool-call parts).
    pub message: Message,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token usage, if the provider reported it.
    pub usage: Option<Usage>,
    /// Raw response headers, lowercased keys.
    pub headers: HashMap<String, String>,
}

impl ModelResponse {
    /// Create a response with no usage or headers.
    #[must_use]
    pub fn new(message: Message, finish_reason: FinishReason) -> Self {
        Self {
            message,
            finish_reason,
            usage: None,
            headers: HashMap::new(),
        }
    }

    /// Attach reported usage.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One element of a streamed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
    /// Incremental assistant text.
    TextDelta {
        /// The text fragment.
        delta: String,
    },
    /// A complete tool call emitted by the model.
    ToolCall {
        /// Call identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input as JSON.
        input: Value,
    },
    /// The outcome of a tool invocation.
    ToolResult {
        /// Identifier of the originating call.
        id: String,
        /// Tool name.
        name: String,
        /// Tool output as JSON.
        output: Value,
    },
    /// The run finished.
    Finish {
        /// Why generation stopped.
        reason: FinishReason,
        /// Cumulative usage, if known.
        usage: Option<Usage>,
    },
    /// The run failed.
    Error {
        /// Wire-shaped error payload.
        error: Value,
    },
}

/// A boxed stream of model parts.
pub type PartStream = Pin<Box<dyn Stream<Item = Result<StreamPart>> + Send>>;

/// The interface the run loop drives.
///
/// Implementations must honor `signal`: a cancelled signal aborts the
/// in-flight call where the underlying transport supports it.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run one model call to completion.
    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        signal: &Signal,
    ) -> Result<ModelResponse>;

    /// Run one model call, yielding parts as they arrive.
    ///
    /// The default implementation adapts [`generate`](Self::generate),
    /// emitting the full text as a single delta followed by tool calls
    /// and a finish part.
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        signal: &Signal,
    ) -> Result<PartStream> {
        let response = self.generate(messages, tools, signal).await?;
        let mut parts = Vec::new();
        if let Some(text) = response.message.text() {
            parts.push(Ok(StreamPart::TextDelta { delta: text }));
        }
        for call in response.message.tool_calls() {
            parts.push(Ok(StreamPart::ToolCall {
                id: call.id,
                name: call.name,
                input: call.input,
            }));
        }
        parts.push(Ok(StreamPart::Finish {
            reason: response.finish_reason,
            usage: response.usage,
        }));
        Ok(Box::pin(futures::stream::iter(parts)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    struct EchoProvider;

    #[async_trait]
    impl ModelProvider for EchoProvider {
        async fn generate(
            &self,
            messages: &[Message],
            _tools: &[ToolDefinition],
            _signal: &Signal,
        ) -> Result<ModelResponse> {
            let text = messages
                .last()
                .and_then(Message::text)
                .unwrap_or_default();
            Ok(ModelResponse::new(Message::assistant(text), FinishReason::Stop)
                .with_usage(Usage::new(3, 7)))
        }
    }

    #[tokio::test]
    async fn default_stream_adapts_generate() {
        let provider = EchoProvider;
        let signal = Signal::new();
        let mut stream = provider
            .stream(&[Message::user("hello")], &[], &signal)
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(
            first,
            StreamPart::TextDelta {
                delta: "hello".into()
            }
        );
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(
            second,
            StreamPart::Finish {
                reason: FinishReason::Stop,
                usage: Some(Usage::new(3, 7)),
            }
        );
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn stream_part_serde_is_kebab_tagged() {
        let part = StreamPart::TextDelta { delta: "x".into() };
        let encoded = serde_json::to_value(&part).unwrap();
        assert_eq!(encoded["type"], "text-delta");
    }
}
