//! Event dispatcher.
//!
//! Each subscription owns an unbounded FIFO queue and a consumer task. A
//! delivery that fails is retried after a fixed backoff until it succeeds or
//! the dispatcher shuts down; later events wait behind it, so a subscription
//! sees its events at least once and in commit order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chronicle_core::event::StoredEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::handler::{Cancellation, HandlerError};
use crate::subscription::{self, Handlers, Subscription};

/// Collects subscriptions before the consumers are started.
pub struct EventDispatcherBuilder {
    config: DispatcherConfig,
    subscriptions: Vec<Subscription>,
}

impl EventDispatcherBuilder {
    /// Adds a subscription.
    #[must_use]
    pub fn subscription(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    /// Spawns one consumer task per subscription. Must be called within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::DuplicateSubscription` if two subscriptions
    /// share a name.
    pub fn start(self) -> Result<EventDispatcher, DispatchError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut routes = Vec::with_capacity(self.subscriptions.len());
        let mut indices = HashMap::with_capacity(self.subscriptions.len());
        let mut tasks = Vec::with_capacity(self.subscriptions.len());

        for subscription in self.subscriptions {
            if indices.contains_key(&subscription.name) {
                shutdown_tx.send_replace(true);
                return Err(DispatchError::DuplicateSubscription(subscription.name));
            }

            let (sender, queue) = mpsc::unbounded_channel();
            let consumer = Consumer {
                name: subscription.name.clone(),
                handlers: subscription.handlers,
                retry_backoff: self.config.retry_backoff,
                cancel: Cancellation::new(shutdown_rx.clone()),
            };
            let span = tracing::info_span!("subscription", name = %subscription.name);
            tasks.push(tokio::spawn(
                consumer.run(queue, shutdown_rx.clone()).instrument(span),
            ));

            indices.insert(subscription.name.clone(), routes.len());
            routes.push(Route {
                name: subscription.name,
                stream_prefix: subscription.stream_prefix,
                sender,
            });
        }

        tracing::info!(subscriptions = routes.len(), "event dispatcher started");
        Ok(EventDispatcher {
            inner: Arc::new(Inner {
                routes,
                indices,
                shutdown: shutdown_tx,
                tasks: Mutex::new(tasks),
            }),
        })
    }
}

struct Route {
    name: String,
    stream_prefix: Option<String>,
    sender: mpsc::UnboundedSender<Vec<StoredEvent>>,
}

struct Inner {
    routes: Vec<Route>,
    indices: HashMap<String, usize>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the running subscriptions. Cheap to clone.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl EventDispatcher {
    /// Starts configuring a dispatcher.
    #[must_use]
    pub fn builder(config: DispatcherConfig) -> EventDispatcherBuilder {
        EventDispatcherBuilder {
            config,
            subscriptions: Vec::new(),
        }
    }

    /// Queues one event for `subscription`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownSubscription` or
    /// `DispatchError::Stopped`.
    pub fn send(&self, subscription: &str, event: StoredEvent) -> Result<(), DispatchError> {
        self.send_batch(subscription, vec![event])
    }

    /// Queues a commit group for `subscription`, bypassing its stream filter.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownSubscription` or
    /// `DispatchError::Stopped`.
    pub fn send_batch(
        &self,
        subscription: &str,
        events: Vec<StoredEvent>,
    ) -> Result<(), DispatchError> {
        let route = self
            .inner
            .indices
            .get(subscription)
            .map(|&index| &self.inner.routes[index])
            .ok_or_else(|| DispatchError::UnknownSubscription(subscription.to_owned()))?;
        self.enqueue(route, events)
    }

    /// Routes a commit group to every subscription observing its streams.
    /// Subscriptions that already stopped are skipped.
    pub fn publish(&self, events: &[StoredEvent]) {
        for route in &self.inner.routes {
            let observed: Vec<StoredEvent> = events
                .iter()
                .filter(|event| {
                    subscription::observes(route.stream_prefix.as_deref(), &event.stream_key)
                })
                .cloned()
                .collect();
            if observed.is_empty() {
                continue;
            }
            if let Err(err) = self.enqueue(route, observed) {
                tracing::warn!(error = %err, "dropping published events");
            }
        }
    }

    fn enqueue(&self, route: &Route, events: Vec<StoredEvent>) -> Result<(), DispatchError> {
        if *self.inner.shutdown.borrow() {
            return Err(DispatchError::Stopped(route.name.clone()));
        }
        route
            .sender
            .send(events)
            .map_err(|_| DispatchError::Stopped(route.name.clone()))
    }

    /// Names of the configured subscriptions, in configuration order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.inner.routes.iter().map(|route| route.name.as_str())
    }

    /// Stops every consumer and waits for them to exit. A consumer waiting
    /// to retry a failed delivery stops immediately and queued events are
    /// discarded. A handler in flight sees its [`Cancellation`] fire and is
    /// awaited until it returns.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "subscription task failed");
            }
        }
        tracing::info!("event dispatcher stopped");
    }
}

/// Marker for a consumer interrupted by shutdown.
struct Stopped;

struct Consumer {
    name: String,
    handlers: Handlers,
    retry_backoff: Duration,
    cancel: Cancellation,
}

impl Consumer {
    async fn run(
        self,
        mut queue: mpsc::UnboundedReceiver<Vec<StoredEvent>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let events = tokio::select! {
                biased;
                () = stopped(&mut shutdown) => break,
                next = queue.recv() => match next {
                    Some(events) => events,
                    None => break,
                },
            };
            if self.deliver(&events, &mut shutdown).await.is_err() {
                break;
            }
        }
        tracing::debug!(subscription = %self.name, "subscription consumer exited");
    }

    async fn deliver(
        &self,
        events: &[StoredEvent],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), Stopped> {
        if !self.handlers.batch.is_empty() {
            self.until_delivered(shutdown, "batch", || self.handle_batch(events))
                .await?;
        }
        for event in events {
            self.until_delivered(shutdown, &event.event_type, || self.handle_event(event))
                .await?;
        }
        Ok(())
    }

    async fn until_delivered<F, Fut>(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        what: &str,
        mut attempt: F,
    ) -> Result<(), Stopped>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), HandlerError>>,
    {
        let mut failures: u64 = 0;
        loop {
            match attempt().await {
                Ok(()) => {
                    if failures > 0 {
                        tracing::info!(
                            subscription = %self.name,
                            delivery = what,
                            failures,
                            "delivery succeeded after retries"
                        );
                    }
                    return Ok(());
                }
                Err(err) => {
                    failures += 1;
                    let backoff_ms =
                        u64::try_from(self.retry_backoff.as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(
                        subscription = %self.name,
                        delivery = what,
                        failures,
                        error = %err,
                        backoff_ms,
                        "handler failed; retrying"
                    );
                    tokio::select! {
                        biased;
                        () = stopped(shutdown) => return Err(Stopped),
                        () = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }

    async fn handle_batch(&self, events: &[StoredEvent]) -> Result<(), HandlerError> {
        for handler in &self.handlers.batch {
            handler.handle_batch(events, &self.cancel).await?;
        }
        Ok(())
    }

    async fn handle_event(&self, event: &StoredEvent) -> Result<(), HandlerError> {
        for handler in &self.handlers.any {
            handler.handle(event, &self.cancel).await?;
        }
        for (event_type, handler) in &self.handlers.typed {
            if *event_type == event.event_type {
                handler.handle(event, &self.cancel).await?;
            }
        }
        Ok(())
    }
}

/// Resolves once shutdown is signalled or the dispatcher is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
