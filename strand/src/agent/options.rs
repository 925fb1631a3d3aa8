//! Per-call options for `generate` and `stream`.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::signal::Signal;

/// Options for one `generate`/`stream` call.
///
/// At least one of `prompt`, `messages`, or a resumable `thread_id` is
/// required.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// User prompt appended as a user message.
    pub prompt: Option<String>,
    /// Messages appended verbatim.
    pub messages: Option<Vec<Message>>,
    /// Thread to load/persist checkpoints under.
    pub thread_id: Option<String>,
    /// Cancellation signal; a fresh one is created when absent.
    pub signal: Option<Signal>,
    /// Step cap for this call; the agent default applies when unset.
    pub max_steps: Option<usize>,
    /// Block on owned background tasks at finish (default true).
    pub wait_for_background_tasks: Option<bool>,
    /// Kill owned background tasks when the signal cancels.
    pub cancel_background_tasks: bool,
}

impl GenerateOptions {
    /// Options carrying just a prompt.
    #[must_use]
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Options carrying explicit messages.
    #[must_use]
    pub fn messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Some(messages),
            ..Self::default()
        }
    }

    /// Options that only resume a thread.
    #[must_use]
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    /// Set the thread id.
    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Set the cancellation signal.
    #[must_use]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Cap the number of steps for this call.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Control blocking on owned background tasks at finish.
    #[must_use]
    pub const fn wait_for_background_tasks(mut self, wait: bool) -> Self {
        self.wait_for_background_tasks = Some(wait);
        self
    }

    /// Kill owned background tasks when the signal cancels.
    #[must_use]
    pub const fn cancel_background_tasks(mut self, cancel: bool) -> Self {
        self.cancel_background_tasks = cancel;
        self
    }

    /// Reject calls with no input at all.
    pub(crate) fn validate(&self) -> Result<()> {
        let has_prompt = self.prompt.as_ref().is_some_and(|p| !p.is_empty());
        let has_messages = self.messages.as_ref().is_some_and(|m| !m.is_empty());
        if has_prompt || has_messages || self.thread_id.is_some() {
            Ok(())
        } else {
            Err(Error::validation(
                "at least one of prompt, messages, or thread_id is required",
            ))
        }
    }
}

impl From<&str> for GenerateOptions {
    fn from(prompt: &str) -> Self {
        Self::prompt(prompt)
    }
}

impl From<String> for GenerateOptions {
    fn from(prompt: String) -> Self {
        Self::prompt(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_options_are_rejected() {
        assert!(GenerateOptions::default().validate().is_err());
        assert!(GenerateOptions::prompt("").validate().is_err());
        assert!(GenerateOptions::messages(vec![]).validate().is_err());
    }

    #[test]
    fn prompt_messages_or_thread_suffice() {
        assert!(GenerateOptions::prompt("hi").validate().is_ok());
        assert!(GenerateOptions::messages(vec![Message::user("hi")]).validate().is_ok());
        assert!(GenerateOptions::thread("t1").validate().is_ok());
    }

    #[test]
    fn from_str_builds_prompt_options() {
        let options: GenerateOptions = "hello".into();
        assert_eq!(options.prompt.as_deref(), Some("hello"));
    }
}
