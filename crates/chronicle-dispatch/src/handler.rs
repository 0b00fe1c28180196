//! Subscription handler traits.

use async_trait::async_trait;
use chronicle_core::event::StoredEvent;
use thiserror::Error;
use tokio::sync::watch;

/// Failure reported by a handler. The dispatcher logs it and retries the
/// same delivery after its backoff interval.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates an error carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<chronicle_core::error::DomainError> for HandlerError {
    fn from(err: chronicle_core::error::DomainError) -> Self {
        Self::new(err.to_string())
    }
}

/// Shutdown signal handed to every handler call.
///
/// The dispatcher does not abort a handler in flight. Handlers doing long
/// waits should race them against [`Cancellation::cancelled`] and return
/// once it resolves.
#[derive(Debug, Clone)]
pub struct Cancellation {
    signal: watch::Receiver<bool>,
}

impl Cancellation {
    pub(crate) fn new(signal: watch::Receiver<bool>) -> Self {
        Self { signal }
    }

    /// Whether the dispatcher is shutting down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once the dispatcher is shutting down or gone.
    pub async fn cancelled(&self) {
        let mut signal = self.signal.clone();
        let _ = signal.wait_for(|stop| *stop).await;
    }
}

/// Receives every committed event group of a subscription at once.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Handles the events of one commit, in position order.
    async fn handle_batch(
        &self,
        events: &[StoredEvent],
        cancel: &Cancellation,
    ) -> Result<(), HandlerError>;
}

/// Receives committed events one at a time.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    async fn handle(&self, event: &StoredEvent, cancel: &Cancellation) -> Result<(), HandlerError>;
}
