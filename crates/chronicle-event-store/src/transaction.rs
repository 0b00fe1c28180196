//! Atomic stream transactions and the backend port that commits them.

use async_trait::async_trait;
use chronicle_core::database::StreamKey;
use chronicle_core::error::DomainError;
use chronicle_core::event::StoredEvent;
use chronicle_core::version::AggregateVersion;
use uuid::Uuid;

/// The stream header change of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOperation {
    /// Create the header; fails if the stream already exists.
    Create {
        /// Version after the write.
        version: AggregateVersion,
    },
    /// Move the header from `expected` to `new`; fails if it is not at
    /// `expected`.
    Advance {
        /// Version the header must hold.
        expected: AggregateVersion,
        /// Version after the write.
        new: AggregateVersion,
    },
}

impl HeaderOperation {
    /// Version the stream holds once the transaction commits.
    #[must_use]
    pub fn new_version(self) -> AggregateVersion {
        match self {
            Self::Create { version } => version,
            Self::Advance { new, .. } => new,
        }
    }
}

/// A contiguous run of events stored as one record.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPacket {
    events: Vec<StoredEvent>,
}

impl EventPacket {
    /// Wraps `events`. Returns `None` for an empty run.
    #[must_use]
    pub fn new(events: Vec<StoredEvent>) -> Option<Self> {
        if events.is_empty() {
            None
        } else {
            Some(Self { events })
        }
    }

    /// The packed events in position order.
    #[must_use]
    pub fn events(&self) -> &[StoredEvent] {
        &self.events
    }

    /// Unwraps the events.
    #[must_use]
    pub fn into_events(self) -> Vec<StoredEvent> {
        self.events
    }
}

/// One record written by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOperation {
    /// A single event.
    Event(StoredEvent),
    /// Several events under one key.
    Packet(EventPacket),
}

impl RecordOperation {
    /// The events carried by this record.
    #[must_use]
    pub fn events(&self) -> &[StoredEvent] {
        match self {
            Self::Event(event) => std::slice::from_ref(event),
            Self::Packet(packet) => packet.events(),
        }
    }

    /// Record identity: the event id, or the first event's id for a packet.
    #[must_use]
    pub fn record_id(&self) -> Uuid {
        self.first().event_id
    }

    /// Position of the first event.
    #[must_use]
    pub fn first_position(&self) -> i64 {
        self.first().position
    }

    /// Causation id shared by the record's events.
    #[must_use]
    pub fn initiator_id(&self) -> Uuid {
        self.first().initiator_id
    }

    fn first(&self) -> &StoredEvent {
        match self {
            Self::Event(event) => event,
            Self::Packet(packet) => &packet.events[0],
        }
    }
}

/// Everything one write submits atomically to a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTransaction {
    /// Target stream.
    pub stream_key: StreamKey,
    /// Conditional header change.
    pub header: HeaderOperation,
    /// Event and packet records, in position order.
    pub records: Vec<RecordOperation>,
}

impl StreamTransaction {
    /// Operations the transaction holds, header included.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.records.len() + 1
    }

    /// All events of the transaction in position order.
    pub fn events(&self) -> impl Iterator<Item = &StoredEvent> {
        self.records.iter().flat_map(RecordOperation::events)
    }
}

/// Result of submitting a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// All operations were applied.
    Committed,
    /// The header condition failed or a record key was taken; nothing was
    /// applied.
    Conflict,
}

/// Storage with an atomic multi-operation primitive.
///
/// Implementations only move records; packing, identities and conflict
/// classification live in [`crate::TransactionalEventDatabase`].
#[async_trait]
pub trait TransactionBackend: Send + Sync {
    /// Records of a stream ordered by first position. Empty if absent.
    async fn read_records(
        &self,
        stream_key: &StreamKey,
    ) -> Result<Vec<RecordOperation>, DomainError>;

    /// Version held by the stream header, `None` if the stream does not
    /// exist.
    async fn read_header(
        &self,
        stream_key: &StreamKey,
    ) -> Result<Option<AggregateVersion>, DomainError>;

    /// Whether any record of the stream was written with `initiator_id`.
    async fn contains_initiator(
        &self,
        stream_key: &StreamKey,
        initiator_id: Uuid,
    ) -> Result<bool, DomainError>;

    /// Applies `transaction` atomically, or nothing of it.
    async fn submit(&self, transaction: &StreamTransaction) -> Result<SubmitOutcome, DomainError>;
}
