//! Background compaction scheduling.
//!
//! The first trigger in a session schedules a debounced compaction task
//! and the conversation goes out unchanged; a later `process` call adopts
//! the completed result atomically. Rapid triggers coalesce: at most
//! `max_pending_tasks` may be queued, excess triggers are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

use super::CompactReason;
use super::summarizer::CompactOutcome;

/// Status of a scheduled compaction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactTaskStatus {
    /// Waiting out the debounce window.
    Scheduled,
    /// Summarizing.
    Running,
    /// Finished; result awaiting adoption.
    Completed,
    /// Summarization failed.
    Failed,
    /// Cancelled before running.
    Cancelled,
}

/// A scheduled compaction task handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactTask {
    /// Task identifier.
    pub id: String,
    /// Current status.
    pub status: CompactTaskStatus,
}

/// A finished background compaction, ready for adoption.
#[derive(Debug, Clone)]
pub struct CompletedCompaction {
    /// Why the compaction was triggered.
    pub reason: CompactReason,
    /// The compaction outcome over the snapshot.
    pub outcome: CompactOutcome,
    /// How many messages the snapshot covered; messages appended since
    /// are re-attached at adoption time.
    pub snapshot_len: usize,
}

#[derive(Debug)]
struct SchedulerState {
    statuses: HashMap<String, CompactTaskStatus>,
    completed: Option<CompletedCompaction>,
    failed: Option<(CompactReason, String)>,
}

/// Debounced, bounded background compaction scheduler.
#[derive(Debug)]
pub struct CompactionScheduler {
    debounce: Duration,
    max_pending: usize,
    pending: AtomicUsize,
    state: Arc<Mutex<SchedulerState>>,
}

impl CompactionScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(debounce: Duration, max_pending: usize) -> Self {
        Self {
            debounce,
            max_pending,
            pending: AtomicUsize::new(0),
            state: Arc::new(Mutex::new(SchedulerState {
                statuses: HashMap::new(),
                completed: None,
                failed: None,
            })),
        }
    }

    /// Schedule a compaction job after the debounce window.
    ///
    /// Returns `None` when `max_pending_tasks` jobs are already queued;
    /// the trigger is dropped, not queued.
    pub fn schedule<F>(
        &self,
        snapshot_len: usize,
        reason: CompactReason,
        job: F,
    ) -> Option<CompactTask>
    where
        F: Future<Output = Result<CompactOutcome>> + Send + 'static,
    {
        if self.pending.load(Ordering::SeqCst) >= self.max_pending {
            debug!("Compaction trigger dropped: scheduler at capacity");
            return None;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);

        let id = Uuid::new_v4().to_string();
        {
            let mut state = lock(&self.state);
            state.statuses.insert(id.clone(), CompactTaskStatus::Scheduled);
        }

        let state = Arc::clone(&self.state);
        let debounce = self.debounce;
        let task_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            {
                let mut guard = lock(&state);
                guard
                    .statuses
                    .insert(task_id.clone(), CompactTaskStatus::Running);
            }
            match job.await {
                Ok(outcome) => {
                    let mut guard = lock(&state);
                    guard.completed = Some(CompletedCompaction {
                        reason,
                        outcome,
                        snapshot_len,
                    });
                    guard
                        .statuses
                        .insert(task_id, CompactTaskStatus::Completed);
                }
                Err(error) => {
                    warn!(%error, "Background compaction failed");
                    let mut guard = lock(&state);
                    guard.failed = Some((reason, error.to_string()));
                    guard.statuses.insert(task_id, CompactTaskStatus::Failed);
                }
            }
        });

        Some(CompactTask {
            id,
            status: CompactTaskStatus::Scheduled,
        })
    }

    /// Take the completed result, if one is ready. Decrements the pending
    /// count; the result can be adopted exactly once.
    #[must_use]
    pub fn take_completed(&self) -> Option<CompletedCompaction> {
        let taken = lock(&self.state).completed.take();
        if taken.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        taken
    }

    /// Take the most recent failure, if a job failed.
    #[must_use]
    pub fn take_failure(&self) -> Option<(CompactReason, String)> {
        let taken = lock(&self.state).failed.take();
        if taken.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        taken
    }

    /// Current task handles, in no particular order.
    #[must_use]
    pub fn tasks(&self) -> Vec<CompactTask> {
        lock(&self.state)
            .statuses
            .iter()
            .map(|(id, status)| CompactTask {
                id: id.clone(),
                status: *status,
            })
            .collect()
    }
}

fn lock(state: &Arc<Mutex<SchedulerState>>) -> std::sync::MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::collections::HashMap as StdHashMap;

    fn outcome(n: usize) -> CompactOutcome {
        CompactOutcome {
            messages: vec![Message::assistant(format!("summary of {n}"))],
            index_map: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn completes_after_debounce_and_is_taken_once() {
        let scheduler = CompactionScheduler::new(Duration::from_millis(5), 2);
        let task = scheduler
            .schedule(10, CompactReason::TokenThreshold, async { Ok(outcome(10)) })
            .unwrap();
        assert_eq!(task.status, CompactTaskStatus::Scheduled);
        assert!(scheduler.take_completed().is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let completed = scheduler.take_completed().unwrap();
        assert_eq!(completed.snapshot_len, 10);
        assert_eq!(completed.reason, CompactReason::TokenThreshold);
        assert!(scheduler.take_completed().is_none());
    }

    #[tokio::test]
    async fn excess_triggers_are_dropped() {
        let scheduler = CompactionScheduler::new(Duration::from_secs(60), 1);
        assert!(
            scheduler
                .schedule(1, CompactReason::TokenThreshold, async { Ok(outcome(1)) })
                .is_some()
        );
        assert!(
            scheduler
                .schedule(2, CompactReason::TokenThreshold, async { Ok(outcome(2)) })
                .is_none()
        );
    }

    #[tokio::test]
    async fn capacity_frees_after_adoption() {
        let scheduler = CompactionScheduler::new(Duration::ZERO, 1);
        scheduler
            .schedule(1, CompactReason::HardCap, async { Ok(outcome(1)) })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scheduler.take_completed().is_some());
        assert!(
            scheduler
                .schedule(2, CompactReason::HardCap, async { Ok(outcome(2)) })
                .is_some()
        );
    }

    #[tokio::test]
    async fn failures_are_reported_separately() {
        let scheduler = CompactionScheduler::new(Duration::ZERO, 1);
        scheduler
            .schedule(1, CompactReason::TokenThreshold, async {
                Err(crate::Error::model("summarizer down"))
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scheduler.take_completed().is_none());
        let (reason, failure) = scheduler.take_failure().unwrap();
        assert_eq!(reason, CompactReason::TokenThreshold);
        assert!(failure.contains("summarizer down"));
    }

    #[tokio::test]
    async fn statuses_are_observable() {
        let scheduler = CompactionScheduler::new(Duration::ZERO, 4);
        scheduler
            .schedule(1, CompactReason::TokenThreshold, async { Ok(outcome(1)) })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let tasks = scheduler.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, CompactTaskStatus::Completed);
    }
}
