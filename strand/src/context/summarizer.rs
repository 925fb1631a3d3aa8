//! Summarization strategies for compaction.
//!
//! Three strategies: rollup (one summary replaces everything older than
//! the keep window), tiered (summaries of summaries up to a tier cap),
//! and structured (JSON summaries with decision/preference/state fields,
//! kept raw in a message sidecar). Rich parts are summarized by
//! reference, never inlined.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::message::{ContentPart, FileSource, ImageSource, Message, Role};

/// Tag prefixing every compaction summary message.
pub const SUMMARY_TAG: &str = "[Previous conversation summary]";

/// How older messages are folded into summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStrategy {
    /// One summary message replaces everything older than the keep window.
    Rollup,
    /// Summaries are themselves consolidated once enough accumulate.
    Tiered,
    /// The summarizer emits structured JSON, stored raw in a sidecar.
    Structured,
}

/// A structured summary, as emitted by a structured-strategy summarizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredSummary {
    /// Decisions made so far.
    pub decisions: Vec<String>,
    /// User preferences observed.
    pub preferences: Vec<String>,
    /// Where the work currently stands.
    pub current_state: String,
    /// Unresolved questions.
    pub open_questions: Vec<String>,
    /// Rich-content references (URLs and content-hash identifiers).
    pub references: Vec<String>,
}

impl StructuredSummary {
    /// Render as markdown for the summary message body.
    #[must_use]
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        fn section(out: &mut String, title: &str, items: &[String]) {
            if !items.is_empty() {
                out.push_str(&format!("## {title}\n"));
                for item in items {
                    out.push_str(&format!("- {item}\n"));
                }
            }
        }
        section(&mut out, "Decisions", &self.decisions);
        section(&mut out, "Preferences", &self.preferences);
        if !self.current_state.is_empty() {
            out.push_str(&format!("## Current state\n{}\n", self.current_state));
        }
        section(&mut out, "Open questions", &self.open_questions);
        section(&mut out, "References", &self.references);
        out
    }
}

/// Produces summaries of transcript text.
///
/// Implementations typically wrap a subagent; tests use canned text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a rendered transcript into prose.
    async fn summarize(&self, transcript: &str) -> Result<String>;

    /// Summarize into the structured shape. The default parses the prose
    /// output as JSON, falling back to storing it as `current_state`.
    async fn summarize_structured(&self, transcript: &str) -> Result<StructuredSummary> {
        let text = self.summarize(transcript).await?;
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| StructuredSummary {
            current_state: text,
            ..StructuredSummary::default()
        }))
    }
}

/// Settings for one compaction pass.
#[derive(Debug, Clone, Copy)]
pub struct CompactionSettings {
    /// Most recent messages kept verbatim.
    pub keep_message_count: usize,
    /// Strategy in effect.
    pub strategy: SummaryStrategy,
    /// Tier consolidation threshold (tiered strategy).
    pub messages_per_tier: usize,
    /// Highest summary tier (tiered strategy).
    pub max_summary_tiers: u64,
}

/// Result of a compaction pass.
#[derive(Debug, Clone)]
pub struct CompactOutcome {
    /// The compacted conversation.
    pub messages: Vec<Message>,
    /// Old index → new index, for every retained message.
    pub index_map: HashMap<usize, usize>,
}

/// The tier of a summary message, if it is one.
#[must_use]
pub fn summary_tier(message: &Message) -> Option<u64> {
    message
        .metadata
        .as_ref()
        .and_then(|m| m.get("summary_tier"))
        .and_then(serde_json::Value::as_u64)
}

fn summary_message(text: String, tier: u64, structured: Option<&StructuredSummary>) -> Message {
    let body = format!("{SUMMARY_TAG}\n\n{text}");
    let mut metadata = json!({ "summary_tier": tier });
    if let Some(summary) = structured {
        metadata["structured"] = json!(summary);
    }
    Message::assistant(body).with_metadata(metadata)
}

fn short_hash(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..12].to_owned()
}

/// Flatten messages into transcript text with inline placeholders for
/// rich parts, collecting their references.
#[must_use]
pub fn render_transcript(messages: &[Message]) -> (String, Vec<String>) {
    let mut lines = Vec::with_capacity(messages.len());
    let mut references: Vec<String> = Vec::new();
    let mut record = |reference: String| {
        if !references.contains(&reference) {
            references.push(reference.clone());
        }
        reference
    };

    for message in messages {
        let mut rendered = Vec::with_capacity(message.content.len());
        for part in &message.content {
            match part {
                ContentPart::Text { text } => rendered.push(text.clone()),
                ContentPart::Image { source } => {
                    let reference = match source {
                        ImageSource::Url { url } => record(url.clone()),
                        ImageSource::Inline { data, media_type } => {
                            record(format!("content-{}:{media_type}", short_hash(data)))
                        }
                    };
                    rendered.push(format!("[image {reference}]"));
                }
                ContentPart::File { source, mime_type } => {
                    let reference = match source {
                        FileSource::Url { url } => record(url.clone()),
                        FileSource::Data { data } => {
                            record(format!("content-{}:{mime_type}", short_hash(data)))
                        }
                    };
                    rendered.push(format!("[file {reference}]"));
                }
                ContentPart::ToolCall { name, input, .. } => {
                    rendered.push(format!("[tool-call {name} {input}]"));
                }
                ContentPart::ToolResult { name, output, .. } => {
                    rendered.push(format!("[tool-result {name} {output}]"));
                }
            }
        }
        lines.push(format!("{}: {}", message.role.as_str(), rendered.join(" ")));
    }

    (lines.join("\n"), references)
}

/// Run one compaction pass over `messages`.
///
/// Messages older than the keep window are folded into summaries; pinned
/// messages (and a leading system message) are retained in place,
/// preserving relative order. Returns the input unchanged when the keep
/// window covers the whole conversation.
///
/// # Errors
///
/// Propagates summarizer failures; the caller leaves the conversation
/// untouched in that case.
pub async fn compact(
    messages: &[Message],
    pinned: &BTreeSet<usize>,
    settings: &CompactionSettings,
    summarizer: &dyn Summarizer,
) -> Result<CompactOutcome> {
    let len = messages.len();
    let identity = || CompactOutcome {
        messages: messages.to_vec(),
        index_map: (0..len).map(|i| (i, i)).collect(),
    };

    if len <= settings.keep_message_count {
        return Ok(identity());
    }

    let start = usize::from(messages.first().is_some_and(|m| m.role == Role::System));
    let boundary = len - settings.keep_message_count;
    if boundary <= start {
        return Ok(identity());
    }

    // Partition the head: retained (pinned), prior summaries, and plain
    // messages to fold.
    let mut retained: Vec<usize> = Vec::new();
    let mut prior_summaries: Vec<&Message> = Vec::new();
    let mut to_fold: Vec<&Message> = Vec::new();
    for index in start..boundary {
        let message = &messages[index];
        if pinned.contains(&index) {
            retained.push(index);
        } else if settings.strategy == SummaryStrategy::Tiered
            && summary_tier(message).is_some()
        {
            prior_summaries.push(message);
        } else {
            to_fold.push(message);
        }
    }

    let mut summaries: Vec<Message> = prior_summaries.iter().map(|m| (*m).clone()).collect();

    if !to_fold.is_empty() {
        let folded: Vec<Message> = to_fold.iter().map(|m| (*m).clone()).collect();
        let (transcript, references) = render_transcript(&folded);
        let new_summary = match settings.strategy {
            SummaryStrategy::Structured => {
                let mut structured = summarizer.summarize_structured(&transcript).await?;
                for reference in references {
                    if !structured.references.contains(&reference) {
                        structured.references.push(reference);
                    }
                }
                summary_message(structured.render_markdown(), 1, Some(&structured))
            }
            SummaryStrategy::Rollup | SummaryStrategy::Tiered => {
                let mut text = summarizer.summarize(&transcript).await?;
                if !references.is_empty() {
                    text.push_str("\n\nReferences:\n");
                    for reference in &references {
                        text.push_str(&format!("- {reference}\n"));
                    }
                }
                summary_message(text, 1, None)
            }
        };
        summaries.push(new_summary);
    }

    if settings.strategy == SummaryStrategy::Tiered {
        consolidate_tiers(&mut summaries, settings, summarizer).await?;
    }

    // Assemble: [system?] + summaries + pinned head (original order) + tail.
    let mut result: Vec<Message> = Vec::with_capacity(start + summaries.len() + retained.len() + settings.keep_message_count);
    let mut index_map = HashMap::new();
    if start == 1 {
        result.push(messages[0].clone());
        index_map.insert(0, 0);
    }
    result.extend(summaries);
    for old_index in retained {
        index_map.insert(old_index, result.len());
        result.push(messages[old_index].clone());
    }
    for old_index in boundary..len {
        index_map.insert(old_index, result.len());
        result.push(messages[old_index].clone());
    }

    Ok(CompactOutcome {
        messages: result,
        index_map,
    })
}

/// Consolidate tier-N summaries into tier-(N+1) once enough accumulate.
async fn consolidate_tiers(
    summaries: &mut Vec<Message>,
    settings: &CompactionSettings,
    summarizer: &dyn Summarizer,
) -> Result<()> {
    if settings.messages_per_tier == 0 {
        return Ok(());
    }
    loop {
        // Find the lowest tier with enough summaries to consolidate.
        let Some(tier) = (1..settings.max_summary_tiers).find(|tier| {
            summaries
                .iter()
                .filter(|m| summary_tier(m) == Some(*tier))
                .count()
                >= settings.messages_per_tier
        }) else {
            return Ok(());
        };

        let group: Vec<usize> = summaries
            .iter()
            .enumerate()
            .filter(|(_, m)| summary_tier(m) == Some(tier))
            .map(|(i, _)| i)
            .take(settings.messages_per_tier)
            .collect();

        let (transcript, _) = render_transcript(
            &group
                .iter()
                .map(|&i| summaries[i].clone())
                .collect::<Vec<_>>(),
        );
        let text = summarizer.summarize(&transcript).await?;
        let consolidated = summary_message(text, tier + 1, None);

        let insert_at = group[0];
        for &index in group.iter().rev() {
            summaries.remove(index);
        }
        summaries.insert(insert_at, consolidated);
    }
}
