//! Domain event abstractions.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::StreamKey;
use crate::error::DomainError;

/// Custom property naming the aggregate type that produced a write.
pub const AGGREGATE_TYPE_PROPERTY: &str = "aggregate-type";

/// Custom property naming the aggregate instance that produced a write.
pub const AGGREGATE_ID_PROPERTY: &str = "aggregate-id";

/// Trait that all domain events implement.
///
/// `EVENT_TYPE` is the discriminator written to storage and used to find the
/// aggregate handler for the event, so it must be unique among the events an
/// aggregate handles and stable across releases.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// The event type name (used for serialization routing).
    const EVENT_TYPE: &'static str;
}

/// Object-safe view of an event recorded on an aggregate but not yet
/// persisted.
pub trait RecordedEvent: Debug + Send + Sync {
    /// The event type name.
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn to_payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Access to the concrete event value.
    fn as_any(&self) -> &dyn Any;
}

impl<E: DomainEvent> RecordedEvent for E {
    fn event_type(&self) -> &'static str {
        E::EVENT_TYPE
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        serde_json::to_value(self).map_err(|e| {
            DomainError::Serialization(format!("failed to encode {}: {e}", E::EVENT_TYPE))
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A serialized event on its way to storage. Identity, position and timestamp
/// are assigned by the event database when the write is planned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Event type name.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
}

impl NewEvent {
    /// Serializes a recorded event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn from_recorded(event: &dyn RecordedEvent) -> Result<Self, DomainError> {
        Ok(Self {
            event_type: event.event_type().to_owned(),
            payload: event.to_payload()?,
        })
    }
}

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier (random or idempotent-derived).
    pub event_id: Uuid,
    /// Stream this event belongs to.
    pub stream_key: StreamKey,
    /// Zero-based position within the stream.
    pub position: i64,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Conversation the write was part of.
    pub conversation_id: Uuid,
    /// Causation id of the write that produced this event.
    pub initiator_id: Uuid,
    /// Free-form properties attached by the writer.
    pub custom_properties: BTreeMap<String, String>,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Decodes the payload into a concrete event type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not match `E`.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, DomainError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::Serialization(format!(
                "failed to decode {} at {}#{}: {e}",
                self.event_type, self.stream_key, self.position
            ))
        })
    }
}

/// Causal metadata shared by every event of one write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteContext {
    /// Conversation (correlation) id.
    pub conversation_id: Uuid,
    /// Causation id; the basis of idempotent event identities.
    pub initiator_id: Uuid,
    /// Free-form properties copied onto every event.
    pub custom_properties: BTreeMap<String, String>,
}

impl WriteContext {
    /// Creates a context without custom properties.
    #[must_use]
    pub fn new(conversation_id: Uuid, initiator_id: Uuid) -> Self {
        Self {
            conversation_id,
            initiator_id,
            custom_properties: BTreeMap::new(),
        }
    }

    /// Adds a custom property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_properties.insert(key.into(), value.into());
        self
    }
}
