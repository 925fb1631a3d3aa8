//! Caller-provided cancellation.
//!
//! Every suspension point in the runtime (model calls, tool executions,
//! hook callbacks, store operations, sleeps) observes a [`Signal`].
//! Cloning is cheap; children created with [`Signal::child`] are cancelled
//! with their parent but can be cancelled independently.

use tokio_util::sync::CancellationToken;

/// A cancellation signal threaded through a run.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    token: CancellationToken,
}

impl Signal {
    /// Create a fresh, uncancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// A child signal: cancelled when this signal is, or on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}
