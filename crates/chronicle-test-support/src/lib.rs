//! Chronicle Test Support: shared mocks and fixtures for tests.
//!
//! This crate is a dev-dependency only. It provides deterministic clocks and
//! id generators, mock event databases and a small sample aggregate.

mod clock;
mod database;
mod ids;
pub mod sample;

pub use clock::FixedClock;
pub use database::{EmptyEventDatabase, FailingEventDatabase, RecordedWrite, RecordingEventDatabase};
pub use ids::SequentialIdGenerator;

use chronicle_core::event::StoredEvent;
use uuid::Uuid;

/// Installs a `tracing` subscriber honouring `RUST_LOG` that writes through
/// the test harness. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Builds a stored event at `position` of `stream_key` with sensible
/// defaults.
///
/// # Panics
///
/// Panics if `event` cannot be serialized.
pub fn stored_event<E: chronicle_core::event::DomainEvent>(
    stream_key: &str,
    position: i64,
    event: &E,
) -> StoredEvent {
    StoredEvent {
        event_id: Uuid::new_v4(),
        stream_key: stream_key.into(),
        position,
        event_type: E::EVENT_TYPE.to_owned(),
        payload: serde_json::to_value(event).unwrap(),
        conversation_id: Uuid::new_v4(),
        initiator_id: Uuid::new_v4(),
        custom_properties: std::collections::BTreeMap::new(),
        occurred_at: chrono::Utc::now(),
    }
}
