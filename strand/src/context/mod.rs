//! The context manager: token budgets, compaction policy, and pinning.
//!
//! Keeps the conversation within a token budget while preserving enough
//! fidelity for useful continuation. Triggering is a policy ladder
//! (error fallback > hard cap > growth rate > token threshold, with a
//! caller override replacing the middle rungs); summarization strategies
//! live in [`summarizer`]; optional background scheduling in
//! [`scheduler`]. Pinned messages survive compaction verbatim.

mod budget;
mod counter;
mod scheduler;
mod summarizer;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::message::Message;
use crate::usage::Usage;

pub use budget::TokenBudget;
pub use counter::{ApproximateCounter, CountFn, CustomCounter, TokenCounter};
pub use scheduler::{CompactTask, CompactTaskStatus, CompactionScheduler, CompletedCompaction};
pub use summarizer::{
    CompactOutcome, CompactionSettings, SUMMARY_TAG, StructuredSummary, SummaryStrategy,
    Summarizer, compact, render_transcript, summary_tier,
};

/// Consecutive summarization failures that disable background mode.
const BACKGROUND_FAILURE_LIMIT: u32 = 3;

/// Why a compaction was triggered, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactReason {
    /// A prior call hit a context-length error.
    ErrorFallback,
    /// Usage crossed the hard cap.
    HardCap,
    /// Predicted usage after the next turn would cross the hard cap.
    GrowthRate,
    /// Usage crossed the soft threshold.
    TokenThreshold,
}

impl CompactReason {
    /// Stable string name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorFallback => "error_fallback",
            Self::HardCap => "hard_cap",
            Self::GrowthRate => "growth_rate",
            Self::TokenThreshold => "token_threshold",
        }
    }
}

/// Background compaction settings.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundCompaction {
    /// Debounce before a scheduled compaction starts.
    pub debounce_delay: Duration,
    /// Queued-task cap; excess triggers are dropped.
    pub max_pending_tasks: usize,
}

impl Default for BackgroundCompaction {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(100),
            max_pending_tasks: 1,
        }
    }
}

/// Context manager configuration.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// The token ceiling.
    pub max_tokens: u64,
    /// Soft trigger as a fraction of the ceiling.
    pub token_threshold: f64,
    /// Hard trigger as a fraction of the ceiling.
    pub hard_cap_threshold: f64,
    /// Most recent messages kept verbatim through compaction.
    pub keep_message_count: usize,
    /// Summarization strategy.
    pub strategy: SummaryStrategy,
    /// Tier consolidation threshold (tiered strategy).
    pub messages_per_tier: usize,
    /// Highest summary tier (tiered strategy).
    pub max_summary_tiers: u64,
    /// Predict next-turn usage from recent growth.
    pub enable_growth_rate_prediction: bool,
    /// Compact once after a context-length error.
    pub enable_error_fallback: bool,
    /// Background scheduling; `None` keeps compaction synchronous.
    pub background: Option<BackgroundCompaction>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 128_000,
            token_threshold: 0.8,
            hard_cap_threshold: 0.95,
            keep_message_count: 8,
            strategy: SummaryStrategy::Rollup,
            messages_per_tier: 4,
            max_summary_tiers: 3,
            enable_growth_rate_prediction: false,
            enable_error_fallback: true,
            background: None,
        }
    }
}

/// Caller override replacing the hard-cap/growth/threshold rungs.
pub type ShouldCompactFn =
    Arc<dyn Fn(&TokenBudget, &[Message]) -> Option<CompactReason> + Send + Sync>;

/// What a compaction pass did, for `PostCompact` reporting.
#[derive(Debug, Clone)]
pub struct CompactionEvent {
    /// Why it triggered.
    pub reason: CompactReason,
    /// Token count before.
    pub before_tokens: u64,
    /// Token count after (equal to before on failure).
    pub after_tokens: u64,
    /// Failure message, when the summarizer failed.
    pub error: Option<String>,
}

/// The result of one `process` call.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    /// The conversation going forward.
    pub messages: Vec<Message>,
    /// Set when a compaction completed, failed, or was adopted.
    pub compaction: Option<CompactionEvent>,
}

/// Token-budgeted conversation compactor.
pub struct ContextManager {
    config: ContextConfig,
    counter: Arc<dyn TokenCounter>,
    pins: Mutex<BTreeMap<usize, Option<String>>>,
    last_reported: Mutex<Option<u64>>,
    prev_tokens: Mutex<Option<u64>>,
    error_fallback: AtomicBool,
    should_compact_override: Option<ShouldCompactFn>,
    scheduler: Option<CompactionScheduler>,
    consecutive_failures: AtomicU32,
    background_disabled: AtomicBool,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("config", &self.config)
            .field("background_disabled", &self.background_disabled)
            .finish_non_exhaustive()
    }
}

impl ContextManager {
    /// Create a manager with the approximate counter.
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        Self::with_counter(config, Arc::new(ApproximateCounter::new()))
    }

    /// Create a manager with an injected counter.
    #[must_use]
    pub fn with_counter(config: ContextConfig, counter: Arc<dyn TokenCounter>) -> Self {
        let scheduler = config
            .background
            .map(|bg| CompactionScheduler::new(bg.debounce_delay, bg.max_pending_tasks));
        Self {
            config,
            counter,
            pins: Mutex::new(BTreeMap::new()),
            last_reported: Mutex::new(None),
            prev_tokens: Mutex::new(None),
            error_fallback: AtomicBool::new(false),
            should_compact_override: None,
            scheduler,
            consecutive_failures: AtomicU32::new(0),
            background_disabled: AtomicBool::new(false),
        }
    }

    /// Replace the default trigger ladder (all rungs except error
    /// fallback) with a caller policy.
    #[must_use]
    pub fn with_should_compact(mut self, f: ShouldCompactFn) -> Self {
        self.should_compact_override = Some(f);
        self
    }

    /// The manager's configuration.
    #[must_use]
    pub const fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Current budget for `messages`. Actual when derived from the
    /// model's last reported usage, estimated otherwise.
    #[must_use]
    pub fn budget(&self, messages: &[Message]) -> TokenBudget {
        let reported = *lock(&self.last_reported);
        match reported {
            Some(tokens) => TokenBudget::new(tokens, self.config.max_tokens, true),
            None => TokenBudget::new(
                self.counter.count(messages),
                self.config.max_tokens,
                false,
            ),
        }
    }

    /// Record the model's reported usage; subsequent budgets are actual.
    pub fn note_reported_usage(&self, usage: Usage) {
        *lock(&self.last_reported) = Some(usage.total_tokens);
    }

    /// Arm the error-fallback trigger after a context-length error.
    pub fn note_context_length_error(&self) {
        self.error_fallback.store(true, Ordering::SeqCst);
    }

    /// Evaluate the trigger ladder.
    #[must_use]
    pub fn should_compact(&self, messages: &[Message]) -> Option<CompactReason> {
        if messages.len() <= self.config.keep_message_count {
            return None;
        }
        if self.config.enable_error_fallback && self.error_fallback.load(Ordering::SeqCst) {
            return Some(CompactReason::ErrorFallback);
        }

        let budget = self.budget(messages);
        if let Some(policy) = &self.should_compact_override {
            return policy(&budget, messages);
        }

        if budget.usage >= self.config.hard_cap_threshold {
            return Some(CompactReason::HardCap);
        }
        if self.config.enable_growth_rate_prediction
            && let Some(prev) = *lock(&self.prev_tokens)
            && budget.current_tokens > prev
        {
            let predicted = budget.current_tokens + (budget.current_tokens - prev);
            if predicted as f64 / self.config.max_tokens as f64 > self.config.hard_cap_threshold {
                return Some(CompactReason::GrowthRate);
            }
        }
        if budget.usage >= self.config.token_threshold {
            return Some(CompactReason::TokenThreshold);
        }
        None
    }

    /// Pin the message at `index`; it survives compaction verbatim.
    pub fn pin(&self, index: usize, reason: Option<String>) {
        lock(&self.pins).insert(index, reason);
    }

    /// Remove a pin. Returns whether it existed.
    pub fn unpin(&self, index: usize) -> bool {
        lock(&self.pins).remove(&index).is_some()
    }

    /// Whether `index` is pinned.
    #[must_use]
    pub fn is_pinned(&self, index: usize) -> bool {
        lock(&self.pins).contains_key(&index)
    }

    /// Shape the conversation: adopt a finished background compaction,
    /// trigger a new one, or compact synchronously.
    ///
    /// Returns the input unchanged when nothing triggers or when a
    /// background task was only just scheduled. A failed summarization
    /// also leaves the conversation untouched and reports the error in
    /// the compaction event.
    pub async fn process(
        &self,
        messages: Vec<Message>,
        summarizer: &Arc<dyn Summarizer>,
    ) -> ProcessReport {
        if let Some(scheduler) = &self.scheduler {
            if let Some((reason, error)) = scheduler.take_failure() {
                self.record_failure();
                let tokens = self.counter.count(&messages);
                return ProcessReport {
                    messages,
                    compaction: Some(CompactionEvent {
                        reason,
                        before_tokens: tokens,
                        after_tokens: tokens,
                        error: Some(error),
                    }),
                };
            }
            if let Some(completed) = scheduler.take_completed() {
                return self.adopt(completed, messages);
            }
        }

        let Some(reason) = self.should_compact(&messages) else {
            self.record_tokens(&messages);
            return ProcessReport {
                messages,
                compaction: None,
            };
        };

        if reason == CompactReason::ErrorFallback {
            self.error_fallback.store(false, Ordering::SeqCst);
        }

        let background_active = self.scheduler.is_some()
            && !self.background_disabled.load(Ordering::SeqCst)
            // Error fallback is an emergency; it always runs inline.
            && reason != CompactReason::ErrorFallback;

        if background_active {
            self.schedule_background(&messages, reason, summarizer);
            return ProcessReport {
                messages,
                compaction: None,
            };
        }

        self.compact_now(messages, reason, summarizer).await
    }

    fn settings(&self) -> CompactionSettings {
        CompactionSettings {
            keep_message_count: self.config.keep_message_count,
            strategy: self.config.strategy,
            messages_per_tier: self.config.messages_per_tier,
            max_summary_tiers: self.config.max_summary_tiers,
        }
    }

    fn schedule_background(
        &self,
        messages: &[Message],
        reason: CompactReason,
        summarizer: &Arc<dyn Summarizer>,
    ) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let snapshot = messages.to_vec();
        let pinned = lock(&self.pins).keys().copied().collect();
        let settings = self.settings();
        let summarizer = Arc::clone(summarizer);
        let scheduled = scheduler.schedule(snapshot.len(), reason, async move {
            compact(&snapshot, &pinned, &settings, summarizer.as_ref()).await
        });
        if let Some(task) = scheduled {
            debug!(task = %task.id, reason = reason.as_str(), "Scheduled background compaction");
        }
    }

    async fn compact_now(
        &self,
        messages: Vec<Message>,
        reason: CompactReason,
        summarizer: &Arc<dyn Summarizer>,
    ) -> ProcessReport {
        let before_tokens = self.counter.count(&messages);
        let pinned = lock(&self.pins).keys().copied().collect();

        match compact(&messages, &pinned, &self.settings(), summarizer.as_ref()).await {
            Ok(outcome) => {
                let after_tokens = self.counter.count(&outcome.messages);
                if after_tokens > before_tokens {
                    self.record_failure();
                    return ProcessReport {
                        messages,
                        compaction: Some(CompactionEvent {
                            reason,
                            before_tokens,
                            after_tokens: before_tokens,
                            error: Some("summary exceeded the original size".to_owned()),
                        }),
                    };
                }

                self.finish_compaction(&outcome);
                info!(
                    reason = reason.as_str(),
                    before_tokens, after_tokens, "Compaction applied"
                );
                ProcessReport {
                    messages: outcome.messages,
                    compaction: Some(CompactionEvent {
                        reason,
                        before_tokens,
                        after_tokens,
                        error: None,
                    }),
                }
            }
            Err(error) => {
                self.record_failure();
                ProcessReport {
                    messages,
                    compaction: Some(CompactionEvent {
                        reason,
                        before_tokens,
                        after_tokens: before_tokens,
                        error: Some(error.to_string()),
                    }),
                }
            }
        }
    }

    /// Apply a background result to the current (possibly longer)
    /// conversation in one step.
    fn adopt(&self, completed: CompletedCompaction, messages: Vec<Message>) -> ProcessReport {
        let before_tokens = self.counter.count(&messages);
        let CompletedCompaction {
            reason,
            outcome,
            snapshot_len,
        } = completed;

        let compacted_len = outcome.messages.len();
        let mut adopted = outcome.messages.clone();
        if messages.len() > snapshot_len {
            adopted.extend(messages[snapshot_len..].iter().cloned());
        }

        // Remap pins: snapshot region through the index map, appended
        // region by offset.
        {
            let mut pins = lock(&self.pins);
            let old: Vec<(usize, Option<String>)> = std::mem::take(&mut *pins).into_iter().collect();
            for (index, reason_text) in old {
                if index < snapshot_len {
                    if let Some(new_index) = outcome.index_map.get(&index) {
                        pins.insert(*new_index, reason_text);
                    }
                } else {
                    pins.insert(compacted_len + (index - snapshot_len), reason_text);
                }
            }
        }

        *lock(&self.last_reported) = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let after_tokens = self.counter.count(&adopted);
        self.record_tokens(&adopted);

        ProcessReport {
            messages: adopted,
            compaction: Some(CompactionEvent {
                reason,
                before_tokens,
                after_tokens,
                error: None,
            }),
        }
    }

    fn finish_compaction(&self, outcome: &CompactOutcome) {
        let mut pins = lock(&self.pins);
        let old: Vec<(usize, Option<String>)> = std::mem::take(&mut *pins).into_iter().collect();
        for (index, reason) in old {
            if let Some(new_index) = outcome.index_map.get(&index) {
                pins.insert(*new_index, reason);
            }
        }
        drop(pins);

        *lock(&self.last_reported) = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.record_tokens(&outcome.messages);
    }

    fn record_tokens(&self, messages: &[Message]) {
        *lock(&self.prev_tokens) = Some(self.counter.count(messages));
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= BACKGROUND_FAILURE_LIMIT
            && !self.background_disabled.swap(true, Ordering::SeqCst)
        {
            info!(failures, "Background compaction disabled for this session");
        }
    }

    /// Whether background compaction has been disabled by repeated
    /// failures.
    #[must_use]
    pub fn background_disabled(&self) -> bool {
        self.background_disabled.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
