//! Token counting with content-addressed caching.
//!
//! Two built-in counters: [`ApproximateCounter`] (heuristic, no model
//! round-trip) and [`CustomCounter`] (caller-provided count function).
//! Both cache per-message counts keyed by a fingerprint over the role
//! and the structural view of every part, so repeated budget checks on a
//! stable prefix are cheap.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::message::{ContentPart, FileSource, ImageSource, Message};

/// Approximate characters per text token.
const CHARS_PER_TOKEN: u64 = 4;
/// Fixed cost of an image part.
const IMAGE_TOKENS: u64 = 1000;
/// Fixed cost of a file part.
const FILE_TOKENS: u64 = 500;
/// Structural overhead per message.
const MESSAGE_OVERHEAD: u64 = 4;

/// Counts tokens for budget decisions.
pub trait TokenCounter: Send + Sync {
    /// Count one message.
    fn count_message(&self, message: &Message) -> u64;

    /// Count a conversation.
    fn count(&self, messages: &[Message]) -> u64 {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Content-addressable fingerprint over role + structural part view.
fn fingerprint(message: &Message) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.role.as_str().hash(&mut hasher);
    for part in &message.content {
        match part {
            ContentPart::Text { text } => {
                0u8.hash(&mut hasher);
                text.hash(&mut hasher);
            }
            ContentPart::Image { source } => {
                1u8.hash(&mut hasher);
                match source {
                    ImageSource::Url { url } => url.hash(&mut hasher),
                    ImageSource::Inline { data, media_type } => {
                        data.hash(&mut hasher);
                        media_type.hash(&mut hasher);
                    }
                }
            }
            ContentPart::File { source, mime_type } => {
                2u8.hash(&mut hasher);
                mime_type.hash(&mut hasher);
                match source {
                    FileSource::Url { url } => url.hash(&mut hasher),
                    FileSource::Data { data } => data.hash(&mut hasher),
                }
            }
            ContentPart::ToolCall { id, name, input } => {
                3u8.hash(&mut hasher);
                id.hash(&mut hasher);
                name.hash(&mut hasher);
                input.to_string().hash(&mut hasher);
            }
            ContentPart::ToolResult { id, name, output } => {
                4u8.hash(&mut hasher);
                id.hash(&mut hasher);
                name.hash(&mut hasher);
                output.to_string().hash(&mut hasher);
            }
        }
    }
    hasher.finish()
}

fn text_tokens(len: usize) -> u64 {
    (len as u64).div_ceil(CHARS_PER_TOKEN)
}

/// Heuristic counter: ~4 chars per token, fixed costs for rich parts.
#[derive(Debug, Default)]
pub struct ApproximateCounter {
    cache: Mutex<HashMap<u64, u64>>,
}

impl ApproximateCounter {
    /// Create a counter with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compute(message: &Message) -> u64 {
        let parts: u64 = message
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text_tokens(text.len()),
                ContentPart::Image { .. } => IMAGE_TOKENS,
                ContentPart::File { .. } => FILE_TOKENS,
                ContentPart::ToolCall { name, input, .. } => {
                    text_tokens(name.len() + input.to_string().len())
                }
                ContentPart::ToolResult { name, output, .. } => {
                    text_tokens(name.len() + output.to_string().len())
                }
            })
            .sum();
        MESSAGE_OVERHEAD + parts
    }
}

impl TokenCounter for ApproximateCounter {
    fn count_message(&self, message: &Message) -> u64 {
        let key = fingerprint(message);
        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *cache.entry(key).or_insert_with(|| Self::compute(message))
    }
}

/// The caller-provided text counting function.
pub type CountFn = Arc<dyn Fn(&str) -> u64 + Send + Sync>;

/// Counter delegating text counting to a caller function.
///
/// Rich parts keep the fixed image/file costs; `overhead` is added per
/// message in place of the built-in structural overhead.
pub struct CustomCounter {
    count_fn: CountFn,
    overhead: u64,
    cache: Mutex<HashMap<u64, u64>>,
}

impl std::fmt::Debug for CustomCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomCounter")
            .field("overhead", &self.overhead)
            .finish_non_exhaustive()
    }
}

impl CustomCounter {
    /// Create a counter around `count_fn` with per-message `overhead`.
    #[must_use]
    pub fn new(count_fn: CountFn, overhead: u64) -> Self {
        Self {
            count_fn,
            overhead,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn compute(&self, message: &Message) -> u64 {
        let parts: u64 = message
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => (self.count_fn)(text),
                ContentPart::Image { .. } => IMAGE_TOKENS,
                ContentPart::File { .. } => FILE_TOKENS,
                ContentPart::ToolCall { name, input, .. } => {
                    (self.count_fn)(&format!("{name} {input}"))
                }
                ContentPart::ToolResult { name, output, .. } => {
                    (self.count_fn)(&format!("{name} {output}"))
                }
            })
            .sum();
        self.overhead + parts
    }
}

impl TokenCounter for CustomCounter {
    fn count_message(&self, message: &Message) -> u64 {
        let key = fingerprint(message);
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return *cached;
        }
        let computed = self.compute(message);
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, computed);
        computed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn text_is_four_chars_per_token_rounded_up() {
        let counter = ApproximateCounter::new();
        // 9 chars -> ceil(9/4) = 3 tokens + 4 overhead.
        let count = counter.count_message(&Message::user("nine char"));
        assert_eq!(count, 7);
    }

    #[test]
    fn image_only_message_costs_at_least_image_plus_overhead() {
        let counter = ApproximateCounter::new();
        let msg = Message::with_parts(
            crate::message::Role::User,
            vec![ContentPart::Image {
                source: ImageSource::Url {
                    url: "https://example.com/x.png".into(),
                },
            }],
        );
        assert_eq!(counter.count_message(&msg), IMAGE_TOKENS + MESSAGE_OVERHEAD);
    }

    #[test]
    fn file_part_has_fixed_cost() {
        let counter = ApproximateCounter::new();
        let msg = Message::with_parts(
            crate::message::Role::User,
            vec![ContentPart::File {
                source: FileSource::Data {
                    data: "aGk=".into(),
                },
                mime_type: "text/plain".into(),
            }],
        );
        assert_eq!(counter.count_message(&msg), FILE_TOKENS + MESSAGE_OVERHEAD);
    }

    #[test]
    fn count_sums_over_conversation() {
        let counter = ApproximateCounter::new();
        let messages = vec![Message::user("abcd"), Message::assistant("efgh")];
        assert_eq!(counter.count(&messages), (4 + 1) * 2);
    }

    #[test]
    fn identical_content_shares_fingerprint() {
        assert_eq!(
            fingerprint(&Message::user("same")),
            fingerprint(&Message::user("same"))
        );
        assert_ne!(
            fingerprint(&Message::user("same")),
            fingerprint(&Message::assistant("same"))
        );
    }

    #[test]
    fn custom_counter_caches_by_fingerprint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let counter = CustomCounter::new(
            Arc::new(move |text: &str| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                text.split_whitespace().count() as u64
            }),
            2,
        );

        let msg = Message::user("three word text");
        assert_eq!(counter.count_message(&msg), 5);
        assert_eq!(counter.count_message(&msg), 5);
        // Second lookup hits the cache.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
