//! Test databases: mock `EventDatabase` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::database::{EventDatabase, StreamKey};
use chronicle_core::error::DomainError;
use chronicle_core::event::{NewEvent, StoredEvent, WriteContext};
use chronicle_core::version::{AggregateVersion, ExpectedVersion};

/// One recorded `write` call.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    /// Target stream.
    pub stream_key: StreamKey,
    /// Events handed to the database.
    pub events: Vec<NewEvent>,
    /// Baseline forwarded by the repository.
    pub retrieved_version: AggregateVersion,
    /// Caller intent.
    pub expected_version: ExpectedVersion,
    /// Write metadata, including the repository's added properties.
    pub context: WriteContext,
}

/// An event database that returns a fixed history from every `read` and
/// records every `write`, which always succeeds.
#[derive(Debug, Default)]
pub struct RecordingEventDatabase {
    history: Vec<StoredEvent>,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl RecordingEventDatabase {
    /// Creates a database whose streams all contain `history`.
    #[must_use]
    pub fn new(history: Vec<StoredEvent>) -> Self {
        Self {
            history,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of all recorded writes.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventDatabase for RecordingEventDatabase {
    async fn read(&self, _stream_key: &StreamKey) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self.history.clone())
    }

    async fn write(
        &self,
        stream_key: &StreamKey,
        events: Vec<NewEvent>,
        retrieved_version: AggregateVersion,
        expected_version: ExpectedVersion,
        context: &WriteContext,
    ) -> Result<AggregateVersion, DomainError> {
        let version = retrieved_version.advanced_by(events.len());
        self.writes.lock().unwrap().push(RecordedWrite {
            stream_key: stream_key.clone(),
            events,
            retrieved_version,
            expected_version,
            context: context.clone(),
        });
        Ok(version)
    }
}

/// An event database whose streams are always empty and which silently
/// accepts writes. Useful for "aggregate not found" scenarios.
#[derive(Debug)]
pub struct EmptyEventDatabase;

#[async_trait]
impl EventDatabase for EmptyEventDatabase {
    async fn read(&self, _stream_key: &StreamKey) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn write(
        &self,
        _stream_key: &StreamKey,
        events: Vec<NewEvent>,
        retrieved_version: AggregateVersion,
        _expected_version: ExpectedVersion,
        _context: &WriteContext,
    ) -> Result<AggregateVersion, DomainError> {
        Ok(retrieved_version.advanced_by(events.len()))
    }
}

/// An event database that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventDatabase;

#[async_trait]
impl EventDatabase for FailingEventDatabase {
    async fn read(&self, _stream_key: &StreamKey) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn write(
        &self,
        _stream_key: &StreamKey,
        _events: Vec<NewEvent>,
        _retrieved_version: AggregateVersion,
        _expected_version: ExpectedVersion,
        _context: &WriteContext,
    ) -> Result<AggregateVersion, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
