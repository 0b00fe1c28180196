//! Dispatcher error types.

use thiserror::Error;

/// Errors returned when configuring or feeding the dispatcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No subscription with this name was configured.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    /// Two subscriptions were configured with the same name.
    #[error("subscription configured twice: {0}")]
    DuplicateSubscription(String),

    /// The subscription has been shut down and accepts no more events.
    #[error("subscription stopped: {0}")]
    Stopped(String),
}
