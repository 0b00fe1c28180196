//! Event application and rehydration.
//!
//! Every aggregate type declares its handlers once in
//! [`Aggregate::register_handlers`]. The resulting [`HandlerRegistry`] is
//! built the first time the type is used and shared by all instances.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::event::{DomainEvent, StoredEvent};

type ApplyFn<A> = Box<dyn Fn(&mut A, &dyn Any) -> bool + Send + Sync>;
type ReplayFn<A> = Box<dyn Fn(&mut A, &StoredEvent) -> Result<(), DomainError> + Send + Sync>;

struct Binding<A> {
    apply: ApplyFn<A>,
    replay: ReplayFn<A>,
}

/// Maps event type names to the handlers of one aggregate type.
pub struct HandlerRegistry<A> {
    bindings: HashMap<&'static str, Binding<A>>,
}

impl<A: 'static> HandlerRegistry<A> {
    fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Registers `handler` for events of type `E`. A second registration for
    /// the same event type replaces the first.
    pub fn on<E: DomainEvent>(&mut self, handler: fn(&mut A, &E)) -> &mut Self {
        let apply: ApplyFn<A> = Box::new(move |target: &mut A, event: &dyn Any| {
            match event.downcast_ref::<E>() {
                Some(event) => {
                    handler(target, event);
                    true
                }
                None => false,
            }
        });
        let replay: ReplayFn<A> = Box::new(move |target: &mut A, stored: &StoredEvent| {
            let event = stored.decode::<E>()?;
            handler(target, &event);
            Ok(())
        });
        self.bindings.insert(E::EVENT_TYPE, Binding { apply, replay });
        self
    }

    /// Whether a handler exists for `event_type`.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.bindings.contains_key(event_type)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

type RegistryCache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

static REGISTRIES: OnceLock<RegistryCache> = OnceLock::new();

/// Returns the handler registry of `A`, building it on first use.
pub fn handlers_for<A: Aggregate>() -> Arc<HandlerRegistry<A>> {
    let cache = REGISTRIES.get_or_init(RegistryCache::default);
    let key = TypeId::of::<A>();

    let cached = cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .cloned();
    if let Some(registry) = cached.and_then(|entry| entry.downcast::<HandlerRegistry<A>>().ok()) {
        return registry;
    }

    let mut registry = HandlerRegistry::new();
    A::register_handlers(&mut registry);
    let registry = Arc::new(registry);
    tracing::debug!(
        aggregate_type = A::AGGREGATE_TYPE,
        handlers = registry.len(),
        "built event handler registry"
    );

    // Another thread may have raced us here; keep whichever landed first.
    let erased: Arc<dyn Any + Send + Sync> = registry.clone();
    let entry = cache
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key)
        .or_insert(erased)
        .clone();
    entry.downcast::<HandlerRegistry<A>>().unwrap_or(registry)
}

/// Applies stored events to `target` in order and returns how many were
/// applied.
///
/// With `require_handler` unset, events without a handler are skipped, which
/// lets old code read streams containing newer event types.
///
/// # Errors
///
/// Returns `DomainError::MissingEventHandler` when `require_handler` is set
/// and an event has no handler, and `DomainError::Serialization` when a
/// payload cannot be decoded. Events before the failing one stay applied.
pub fn apply_events<A: Aggregate>(
    target: &mut A,
    events: &[StoredEvent],
    require_handler: bool,
) -> Result<usize, DomainError> {
    let registry = handlers_for::<A>();
    let mut applied = 0;
    for stored in events {
        match registry.bindings.get(stored.event_type.as_str()) {
            Some(binding) => {
                (binding.replay)(target, stored)?;
                applied += 1;
            }
            None if require_handler => {
                return Err(DomainError::MissingEventHandler {
                    aggregate_type: A::AGGREGATE_TYPE,
                    event_type: stored.event_type.clone(),
                });
            }
            None => {
                tracing::trace!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    event_type = %stored.event_type,
                    position = stored.position,
                    "skipping event without handler"
                );
            }
        }
    }
    Ok(applied)
}

/// Runs the handler for a freshly produced event and records it.
pub(crate) fn apply_new<A: Aggregate, E: DomainEvent>(
    target: &mut A,
    event: E,
) -> Result<(), DomainError> {
    let registry = handlers_for::<A>();
    let handled = registry
        .bindings
        .get(E::EVENT_TYPE)
        .is_some_and(|binding| (binding.apply)(target, &event));
    if !handled {
        return Err(DomainError::MissingEventHandler {
            aggregate_type: A::AGGREGATE_TYPE,
            event_type: E::EVENT_TYPE.to_owned(),
        });
    }
    target.recorder_mut().record(event);
    Ok(())
}
