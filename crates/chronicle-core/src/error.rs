//! Domain error types.

use thiserror::Error;

use crate::version::{AggregateVersion, ExpectedVersion};

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No events exist for the requested aggregate.
    #[error("aggregate not found: {aggregate_type} {aggregate_id}")]
    AggregateNotFound {
        /// Aggregate type name.
        aggregate_type: &'static str,
        /// Display form of the aggregate identifier.
        aggregate_id: String,
    },

    /// Optimistic concurrency violation.
    #[error(
        "unexpected version on stream {stream_key}: expected {expected}, retrieved {retrieved}, actual {}",
        display_actual(.actual)
    )]
    UnexpectedVersion {
        /// Stream the write targeted.
        stream_key: String,
        /// Version the caller asked for.
        expected: ExpectedVersion,
        /// Version observed when the aggregate was loaded.
        retrieved: AggregateVersion,
        /// Version found in storage, when it was read.
        actual: Option<AggregateVersion>,
    },

    /// An aggregate has no handler for an event it was asked to apply.
    #[error("aggregate {aggregate_type} has no handler for event {event_type}")]
    MissingEventHandler {
        /// Aggregate type name.
        aggregate_type: &'static str,
        /// Event type name without a handler.
        event_type: String,
    },

    /// A version value outside the permitted range.
    #[error("invalid version: {0}")]
    InvalidVersion(i64),

    /// Idempotent identities require a non-nil causation id.
    #[error("idempotent event identity requires a non-nil causation id")]
    InvalidCausationId,

    /// A batch does not fit into one atomic transaction.
    #[error("{event_count} events exceed the per-transaction limit of {limit}")]
    EventPackingLimitExceeded {
        /// Number of events in the rejected batch.
        event_count: usize,
        /// Largest batch the backend accepts in one transaction.
        limit: usize,
    },

    /// An event payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

fn display_actual(actual: &Option<AggregateVersion>) -> String {
    match actual {
        Some(version) => version.to_string(),
        None => "unknown".to_owned(),
    }
}
