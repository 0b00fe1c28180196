//! Event database port.
//!
//! Storage backends implement [`EventDatabase`]; the repository only talks to
//! this trait. Stream keys are derived from the aggregate type name and the
//! aggregate id through a pluggable [`StreamKeyStrategy`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::{NewEvent, StoredEvent, WriteContext};
use crate::version::{AggregateVersion, ExpectedVersion};

/// Identifies one event stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    /// Wraps a raw stream key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Derives the stream key of an aggregate instance.
pub trait StreamKeyStrategy: Send + Sync {
    /// Returns the stream key for `aggregate_id` of type `aggregate_type`.
    fn stream_key(&self, aggregate_type: &str, aggregate_id: &str) -> StreamKey;
}

impl<F> StreamKeyStrategy for F
where
    F: Fn(&str, &str) -> StreamKey + Send + Sync,
{
    fn stream_key(&self, aggregate_type: &str, aggregate_id: &str) -> StreamKey {
        self(aggregate_type, aggregate_id)
    }
}

/// The default `"{TypeName}-{Id}"` naming.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeNameStreamKeys;

impl StreamKeyStrategy for TypeNameStreamKeys {
    fn stream_key(&self, aggregate_type: &str, aggregate_id: &str) -> StreamKey {
        StreamKey(format!("{aggregate_type}-{aggregate_id}"))
    }
}

/// Port for reading and appending event streams.
#[async_trait]
pub trait EventDatabase: Send + Sync {
    /// Load all events of a stream ordered by position. A missing stream
    /// yields an empty list.
    async fn read(&self, stream_key: &StreamKey) -> Result<Vec<StoredEvent>, DomainError>;

    /// Append `events` after `retrieved_version`, honouring
    /// `expected_version`. Returns the stream version after the write.
    ///
    /// Implementations must assign positions starting at
    /// `retrieved_version.next_position()` and fail with
    /// `DomainError::UnexpectedVersion` when the stream moved on.
    async fn write(
        &self,
        stream_key: &StreamKey,
        events: Vec<NewEvent>,
        retrieved_version: AggregateVersion,
        expected_version: ExpectedVersion,
        context: &WriteContext,
    ) -> Result<AggregateVersion, DomainError>;
}
