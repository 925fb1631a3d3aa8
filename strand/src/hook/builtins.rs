//! Ready-made hooks for common policies.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{info, warn};

use super::event::HookInput;
use super::output::HookOutput;
use super::registry::{HookFn, hook};

/// Retry transient generation failures up to `max_retries` times.
///
/// Fires on `PostGenerateFailure`: when the error is retryable, requests
/// a retry delayed by the error's advertised `retry_after_ms` (or
/// `default_delay_ms` when absent). The attempt counter spans the whole
/// run, so install a fresh hook per agent.
#[must_use]
pub fn retry_transient(max_retries: u32, default_delay_ms: u64) -> HookFn {
    let attempts = Arc::new(AtomicU32::new(0));
    hook(move |input| {
        let attempts = Arc::clone(&attempts);
        async move {
            let HookInput::PostGenerateFailure { error, .. } = input else {
                return Ok(HookOutput::observe());
            };
            if error["retryable"] != serde_json::Value::Bool(true) {
                return Ok(HookOutput::observe());
            }
            if attempts.fetch_add(1, Ordering::SeqCst) >= max_retries {
                return Ok(HookOutput::observe());
            }
            let delay = error["metadata"]["retry_after_ms"]
                .as_u64()
                .unwrap_or(default_delay_ms);
            warn!(delay_ms = delay, "Retrying transient generation failure");
            Ok(HookOutput::retry_after_ms(delay))
        }
    })
}

/// Log every event it is registered for at info level.
#[must_use]
pub fn log_lifecycle() -> HookFn {
    hook(|input| async move {
        match &input {
            HookInput::PreToolUse {
                tool_name,
                tool_call_id,
                ..
            } => info!(tool = %tool_name, call = %tool_call_id, "Tool starting"),
            HookInput::PostToolUse { tool_name, .. } => {
                info!(tool = %tool_name, "Tool finished");
            }
            HookInput::PostToolUseFailure {
                tool_name, error, ..
            } => warn!(tool = %tool_name, error = %error, "Tool failed"),
            HookInput::PostGenerateFailure { error, origin } => {
                warn!(%origin, error = %error, "Generation failed");
            }
            other => info!(event = other.event().as_str(), "Lifecycle event"),
        }
        Ok(HookOutput::observe())
    })
}
