//! Message types for agent-model communication.
//!
//! A [`Message`] is a role-tagged record whose content is an ordered list
//! of [`ContentPart`]s: text, rich media (images, files), tool calls, and
//! tool results. Within one completed step, every tool call emitted by an
//! assistant message is matched by exactly one tool result in a subsequent
//! tool message.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool result message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Where an image's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ImageSource {
    /// The image is referenced by URL.
    Url {
        /// The image URL.
        url: String,
    },
    /// The image is carried inline as base64 data.
    Inline {
        /// Base64-encoded image bytes.
        data: String,
        /// The image media type (e.g. `image/png`).
        media_type: String,
    },
}

impl ImageSource {
    /// Encode raw image bytes as an inline source.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], media_type: impl Into<String>) -> Self {
        Self::Inline {
            data: BASE64.encode(bytes),
            media_type: media_type.into(),
        }
    }

    /// Decode the inline payload back to bytes. `None` for URL sources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the inline data is not valid
    /// base64.
    pub fn bytes(&self) -> Option<Result<Vec<u8>>> {
        match self {
            Self::Inline { data, .. } => Some(
                BASE64
                    .decode(data)
                    .map_err(|e| Error::validation(format!("invalid inline image data: {e}"))),
            ),
            Self::Url { .. } => None,
        }
    }
}

/// Where a file's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum FileSource {
    /// The file is referenced by URL.
    Url {
        /// The file URL.
        url: String,
    },
    /// The file is carried inline as base64 data.
    Data {
        /// Base64-encoded file bytes.
        data: String,
    },
}

impl FileSource {
    /// Encode raw file bytes as an inline source.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::Data {
            data: BASE64.encode(bytes),
        }
    }

    /// Decode the inline payload back to bytes. `None` for URL sources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the inline data is not valid
    /// base64.
    pub fn bytes(&self) -> Option<Result<Vec<u8>>> {
        match self {
            Self::Data { data } => Some(
                BASE64
                    .decode(data)
                    .map_err(|e| Error::validation(format!("invalid inline file data: {e}"))),
            ),
            Self::Url { .. } => None,
        }
    }
}

/// One ordered element of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An image, by URL or inline.
    Image {
        /// The image source.
        source: ImageSource,
    },
    /// A file, by URL or inline, with its media type.
    File {
        /// The file source.
        source: FileSource,
        /// The file's MIME type.
        mime_type: String,
    },
    /// A tool invocation emitted by the model.
    ToolCall {
        /// Unique identifier tying the call to its result.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Tool input as JSON.
        input: Value,
    },
    /// The outcome of a tool invocation.
    ToolResult {
        /// Identifier of the originating call.
        id: String,
        /// Name of the tool that ran.
        name: String,
        /// Tool output as JSON; error payloads use `{"error": {...}}`.
        output: Value,
    },
}

impl ContentPart {
    /// Create a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get the text content if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A tool call extracted from an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier tying the call to its result.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Tool input as JSON.
    pub input: Value,
}

/// A chat message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Ordered content parts.
    pub content: Vec<ContentPart>,
    /// Sidecar data attached by the runtime (e.g. raw structured-summary
    /// JSON on compaction summaries). Not sent to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    /// Create a message with the given role and a single text part.
    #[must_use]
    pub fn new_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
            metadata: None,
        }
    }

    /// Create a new system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new_text(Role::System, text)
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new_text(Role::User, text)
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new_text(Role::Assistant, text)
    }

    /// Create a message from explicit content parts.
    #[must_use]
    pub const fn with_parts(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            metadata: None,
        }
    }

    /// Create a tool message carrying a single tool result.
    #[must_use]
    pub fn tool_result(id: impl Into<String>, name: impl Into<String>, output: Value) -> Self {
        Self::with_parts(
            Role::Tool,
            vec![ContentPart::ToolResult {
                id: id.into(),
                name: name.into(),
                output,
            }],
        )
    }

    /// Attach sidecar metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Joined text of all text parts, or `None` if there are none.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self.content.iter().filter_map(ContentPart::as_text).collect();
        (!texts.is_empty()).then(|| texts.join("\n"))
    }

    /// Tool calls carried by this message, in emission order.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Whether this message carries at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, ContentPart::ToolCall { .. }))
    }

    /// Identifiers of tool results carried by this message.
    #[must_use]
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}
