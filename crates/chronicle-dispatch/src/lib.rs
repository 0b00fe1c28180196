//! Chronicle Dispatch: in-process delivery of committed events.
//!
//! Subscriptions are named FIFO queues, each drained by its own task. A
//! handler failure blocks its subscription and is retried with a fixed
//! backoff, so every handler sees every event at least once and in order.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod subscription;

pub use config::DispatcherConfig;
pub use dispatcher::{EventDispatcher, EventDispatcherBuilder};
pub use error::DispatchError;
pub use handler::{BatchHandler, Cancellation, EventHandler, HandlerError};
pub use subscription::Subscription;
