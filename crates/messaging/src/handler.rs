//! Consumer-side handler contract.

use async_trait::async_trait;

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Side effects are done; the delivery is acknowledged.
    Completed,
    /// A transient failure; the delivery is retried up to the retry limit.
    Retryable(String),
    /// The delivery can never succeed; it is dead-lettered immediately.
    Fatal(String),
}

impl HandlerOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Reacts to a decoded message of type `T`.
///
/// Deliveries are at-least-once: implementations must tolerate being invoked
/// more than once for the same message.
#[async_trait]
pub trait EventHandler<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn handle(&self, message: T) -> HandlerOutcome;
}
