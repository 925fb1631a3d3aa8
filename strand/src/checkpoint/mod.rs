//! Checkpoints and interrupts.
//!
//! A checkpoint snapshots a thread so `generate` can resume mid-loop
//! across process restarts, specifically across unresolved interrupts.
//! While any interrupt on a checkpoint is pending, the thread is
//! suspended and no new generation may start until a response arrives.

mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::state::AgentState;

pub use store::{CheckpointStore, FsCheckpointStore, InMemoryCheckpointStore};

/// What kind of out-of-band response an interrupt waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum InterruptKind {
    /// User approval of a tool call.
    Approval,
}

/// The request side of an approval interrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// The suspended tool call.
    pub tool_call_id: String,
    /// The tool awaiting approval.
    pub tool_name: String,
    /// The call's arguments at suspension time.
    pub args: Value,
    /// The step the call belongs to.
    pub step: u64,
}

/// The response side of an approval interrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Whether the user approved the call.
    pub approved: bool,
    /// Replacement arguments, when the user edited them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<Value>,
}

impl ApprovalResponse {
    /// An unconditional approval.
    #[must_use]
    pub const fn approve() -> Self {
        Self {
            approved: true,
            modified_args: None,
        }
    }

    /// A denial.
    #[must_use]
    pub const fn deny() -> Self {
        Self {
            approved: false,
            modified_args: None,
        }
    }
}

/// A suspension of the run loop pending an out-of-band response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Interrupt identifier.
    pub id: String,
    /// The suspended thread.
    pub thread_id: String,
    /// Interrupt kind.
    pub kind: InterruptKind,
    /// The approval request.
    pub request: ApprovalRequest,
    /// The response, once supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ApprovalResponse>,
    /// When the interrupt was raised.
    pub created_at: DateTime<Utc>,
}

impl Interrupt {
    /// Raise an approval interrupt.
    #[must_use]
    pub fn approval(thread_id: impl Into<String>, request: ApprovalRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            kind: InterruptKind::Approval,
            request,
            response: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the interrupt still awaits a response.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.response.is_none()
    }
}

/// A durable snapshot of one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The thread this checkpoint belongs to.
    pub thread_id: String,
    /// Steps completed; monotonic non-decreasing along the thread.
    pub step: u64,
    /// Conversation history.
    pub messages: Vec<Message>,
    /// Agent state at snapshot time.
    pub state: AgentState,
    /// Raised interrupts, responded or pending.
    pub interrupts: Vec<Interrupt>,
    /// When the thread's first checkpoint was written.
    pub created_at: DateTime<Utc>,
    /// When this snapshot was written; never before `created_at`.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A fresh checkpoint for a new thread.
    #[must_use]
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            step: 0,
            messages: Vec::new(),
            state: AgentState::new(),
            interrupts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether any interrupt is unresolved. A suspended thread admits no
    /// new generation until responded.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.interrupts.iter().any(Interrupt::is_pending)
    }

    /// The first pending interrupt, if any.
    #[must_use]
    pub fn pending_interrupt(&self) -> Option<&Interrupt> {
        self.interrupts.iter().find(|i| i.is_pending())
    }

    /// Find an interrupt by id.
    #[must_use]
    pub fn find_interrupt(&self, id: &str) -> Option<&Interrupt> {
        self.interrupts.iter().find(|i| i.id == id)
    }

    /// Attach a response to a pending interrupt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the interrupt is unknown or
    /// already responded.
    pub fn respond(&mut self, interrupt_id: &str, response: ApprovalResponse) -> Result<()> {
        let interrupt = self
            .interrupts
            .iter_mut()
            .find(|i| i.id == interrupt_id)
            .ok_or_else(|| Error::validation(format!("unknown interrupt '{interrupt_id}'")))?;
        if interrupt.response.is_some() {
            return Err(Error::validation(format!(
                "interrupt '{interrupt_id}' already responded"
            )));
        }
        interrupt.response = Some(response);
        self.touch();
        Ok(())
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approval_request() -> ApprovalRequest {
        ApprovalRequest {
            tool_call_id: "call-1".into(),
            tool_name: "write".into(),
            args: json!({"path": "hello.txt"}),
            step: 1,
        }
    }

    #[test]
    fn fresh_checkpoint_is_not_suspended() {
        let cp = Checkpoint::new("t1");
        assert!(!cp.is_suspended());
        assert_eq!(cp.step, 0);
        assert!(cp.updated_at >= cp.created_at);
    }

    #[test]
    fn pending_interrupt_suspends_the_thread() {
        let mut cp = Checkpoint::new("t1");
        cp.interrupts
            .push(Interrupt::approval("t1", approval_request()));
        assert!(cp.is_suspended());
        assert_eq!(
            cp.pending_interrupt().unwrap().request.tool_name,
            "write"
        );
    }

    #[test]
    fn responding_lifts_the_suspension() {
        let mut cp = Checkpoint::new("t1");
        let interrupt = Interrupt::approval("t1", approval_request());
        let id = interrupt.id.clone();
        cp.interrupts.push(interrupt);

        cp.respond(&id, ApprovalResponse::approve()).unwrap();
        assert!(!cp.is_suspended());
        assert!(cp.find_interrupt(&id).unwrap().response.as_ref().unwrap().approved);
    }

    #[test]
    fn double_response_is_rejected() {
        let mut cp = Checkpoint::new("t1");
        let interrupt = Interrupt::approval("t1", approval_request());
        let id = interrupt.id.clone();
        cp.interrupts.push(interrupt);

        cp.respond(&id, ApprovalResponse::deny()).unwrap();
        assert!(cp.respond(&id, ApprovalResponse::approve()).is_err());
    }

    #[test]
    fn unknown_interrupt_is_rejected() {
        let mut cp = Checkpoint::new("t1");
        assert!(cp.respond("missing", ApprovalResponse::approve()).is_err());
    }

    #[test]
    fn serde_round_trip_preserves_everything() {
        let mut cp = Checkpoint::new("t1");
        cp.step = 3;
        cp.messages.push(crate::message::Message::user("hello"));
        cp.state.write_file("a.txt", "content");
        cp.interrupts
            .push(Interrupt::approval("t1", approval_request()));

        let decoded: Checkpoint =
            serde_json::from_str(&serde_json::to_string(&cp).unwrap()).unwrap();
        assert_eq!(decoded, cp);
    }
}
