//! Subscription definitions.

use std::sync::Arc;

use chronicle_core::database::StreamKey;

use crate::handler::{BatchHandler, EventHandler};

/// A named delivery channel and the handlers attached to it.
///
/// Handlers run in a fixed order for every delivery: batch handlers first,
/// then for each event the any-event handlers followed by the handlers
/// registered for that event type, each group in registration order.
pub struct Subscription {
    pub(crate) name: String,
    pub(crate) stream_prefix: Option<String>,
    pub(crate) handlers: Handlers,
}

#[derive(Default, Clone)]
pub(crate) struct Handlers {
    pub(crate) batch: Vec<Arc<dyn BatchHandler>>,
    pub(crate) any: Vec<Arc<dyn EventHandler>>,
    pub(crate) typed: Vec<(String, Arc<dyn EventHandler>)>,
}

impl Subscription {
    /// Creates a subscription observing every stream.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream_prefix: None,
            handlers: Handlers::default(),
        }
    }

    /// Restricts published events to streams whose key starts with `prefix`.
    #[must_use]
    pub fn observing(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = Some(prefix.into());
        self
    }

    /// Adds a handler receiving each commit group as a whole.
    #[must_use]
    pub fn on_batch(mut self, handler: impl BatchHandler + 'static) -> Self {
        self.handlers.batch.push(Arc::new(handler));
        self
    }

    /// Adds a handler receiving every event.
    #[must_use]
    pub fn on_any(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.any.push(Arc::new(handler));
        self
    }

    /// Adds a handler receiving only events of `event_type`.
    #[must_use]
    pub fn on_event_type(
        mut self,
        event_type: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.handlers.typed.push((event_type.into(), Arc::new(handler)));
        self
    }

    /// The subscription name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether events of `stream_key` are routed here by `publish`.
    #[must_use]
    pub fn observes(&self, stream_key: &StreamKey) -> bool {
        observes(self.stream_prefix.as_deref(), stream_key)
    }
}

pub(crate) fn observes(stream_prefix: Option<&str>, stream_key: &StreamKey) -> bool {
    stream_prefix.is_none_or(|prefix| stream_key.as_str().starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_without_prefix_observes_everything() {
        let subscription = Subscription::new("audit");

        assert!(subscription.observes(&StreamKey::new("Inventory-1")));
        assert!(subscription.observes(&StreamKey::new("Order-9")));
    }

    #[test]
    fn test_prefix_restricts_observed_streams() {
        let subscription = Subscription::new("stock").observing("Inventory-");

        assert!(subscription.observes(&StreamKey::new("Inventory-1")));
        assert!(!subscription.observes(&StreamKey::new("Order-9")));
        assert_eq!(subscription.name(), "stock");
    }
}
