//! Aggregate root abstraction.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::applier::{self, HandlerRegistry};
use crate::error::DomainError;
use crate::event::{DomainEvent, NewEvent, RecordedEvent};
use crate::version::AggregateVersion;

/// Trait for aggregate roots that reconstitute from event history.
///
/// State changes go exclusively through [`Aggregate::apply`], which runs the
/// registered handler for the event and records the event for the next save.
pub trait Aggregate: Send + Sync + Sized + 'static {
    /// Type name used in stream keys and errors.
    const AGGREGATE_TYPE: &'static str;

    /// Identifier type.
    type Id: fmt::Display + Send + Sync;

    /// Creates an instance with no history, ready for rehydration.
    fn blank(id: &Self::Id) -> Self;

    /// Binds each handled event type to its handler. Called once per
    /// aggregate type.
    fn register_handlers(handlers: &mut HandlerRegistry<Self>);

    /// Events applied but not yet persisted.
    fn recorder(&self) -> &EventRecorder;

    /// Mutable access to the pending events.
    fn recorder_mut(&mut self) -> &mut EventRecorder;

    /// Applies a new event to the aggregate and records it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MissingEventHandler` if no handler is registered
    /// for `E`; the aggregate is left untouched in that case.
    fn apply<E: DomainEvent>(&mut self, event: E) -> Result<(), DomainError> {
        applier::apply_new(self, event)
    }

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Box<dyn RecordedEvent>] {
        self.recorder().events()
    }

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self) {
        self.recorder_mut().clear();
    }
}

/// Buffer of events applied to an aggregate but not yet persisted.
#[derive(Debug, Default)]
pub struct EventRecorder {
    pending: Vec<Box<dyn RecordedEvent>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the buffer.
    pub fn record(&mut self, event: impl RecordedEvent + 'static) {
        self.pending.push(Box::new(event));
    }

    /// The pending events in application order.
    #[must_use]
    pub fn events(&self) -> &[Box<dyn RecordedEvent>] {
        &self.pending
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops all pending events.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Serializes the pending events for the event database.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if any payload cannot be encoded.
    pub fn to_new_events(&self) -> Result<Vec<NewEvent>, DomainError> {
        self.pending
            .iter()
            .map(|event| NewEvent::from_recorded(event.as_ref()))
            .collect()
    }
}

/// An aggregate together with the stream version it was loaded at.
///
/// Returned by the repository's `get`/`try_get` and required by `save`. A
/// freshly created aggregate is wrapped with [`Loaded::new`] and starts at
/// [`AggregateVersion::DOES_NOT_EXIST`].
#[derive(Debug)]
pub struct Loaded<A> {
    aggregate: A,
    retrieved_version: AggregateVersion,
}

impl<A> Loaded<A> {
    /// Wraps an aggregate that has never been persisted.
    #[must_use]
    pub fn new(aggregate: A) -> Self {
        Self {
            aggregate,
            retrieved_version: AggregateVersion::DOES_NOT_EXIST,
        }
    }

    pub(crate) fn at_version(aggregate: A, retrieved_version: AggregateVersion) -> Self {
        Self {
            aggregate,
            retrieved_version,
        }
    }

    /// Version observed when the aggregate was last read or saved.
    #[must_use]
    pub fn retrieved_version(&self) -> AggregateVersion {
        self.retrieved_version
    }

    pub(crate) fn set_retrieved_version(&mut self, version: AggregateVersion) {
        self.retrieved_version = version;
    }

    /// Unwraps the aggregate, discarding the version.
    #[must_use]
    pub fn into_inner(self) -> A {
        self.aggregate
    }
}

impl<A> Deref for Loaded<A> {
    type Target = A;

    fn deref(&self) -> &A {
        &self.aggregate
    }
}

impl<A> DerefMut for Loaded<A> {
    fn deref_mut(&mut self) -> &mut A {
        &mut self.aggregate
    }
}
