//! In-memory transaction backend.
//!
//! Streams live behind an outer `RwLock` mapping keys to per-stream
//! `Mutex`es, so writers of different streams do not contend. Each submit
//! checks the header and every record key before applying anything.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chronicle_core::database::StreamKey;
use chronicle_core::error::DomainError;
use chronicle_core::version::AggregateVersion;
use uuid::Uuid;

use crate::transaction::{
    HeaderOperation, RecordOperation, StreamTransaction, SubmitOutcome, TransactionBackend,
};

#[derive(Debug, Default)]
struct StreamState {
    version: Option<AggregateVersion>,
    records: Vec<RecordOperation>,
    positions: HashSet<i64>,
    event_ids: HashSet<Uuid>,
}

impl StreamState {
    fn header_matches(&self, header: HeaderOperation) -> bool {
        match header {
            HeaderOperation::Create { .. } => self.version.is_none(),
            HeaderOperation::Advance { expected, .. } => self.version == Some(expected),
        }
    }

    fn keys_free(&self, transaction: &StreamTransaction) -> bool {
        let mut positions = HashSet::new();
        let mut event_ids = HashSet::new();
        transaction.events().all(|event| {
            !self.positions.contains(&event.position)
                && !self.event_ids.contains(&event.event_id)
                && positions.insert(event.position)
                && event_ids.insert(event.event_id)
        })
    }
}

type SharedStream = Arc<Mutex<StreamState>>;

/// Event streams held in process memory. Clones share the same streams.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    streams: Arc<RwLock<HashMap<StreamKey, SharedStream>>>,
}

fn poisoned(what: &str) -> DomainError {
    DomainError::Infrastructure(format!("in-memory {what} lock poisoned"))
}

impl InMemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams with a header.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if a lock is poisoned.
    pub fn stream_count(&self) -> Result<usize, DomainError> {
        let streams: Vec<SharedStream> = self
            .streams
            .read()
            .map_err(|_| poisoned("stream map"))?
            .values()
            .cloned()
            .collect();
        let mut count = 0;
        for stream in streams {
            if lock(&stream)?.version.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn existing(&self, stream_key: &StreamKey) -> Result<Option<SharedStream>, DomainError> {
        Ok(self
            .streams
            .read()
            .map_err(|_| poisoned("stream map"))?
            .get(stream_key)
            .cloned())
    }

    fn existing_or_new(&self, stream_key: &StreamKey) -> Result<SharedStream, DomainError> {
        if let Some(stream) = self.existing(stream_key)? {
            return Ok(stream);
        }
        Ok(self
            .streams
            .write()
            .map_err(|_| poisoned("stream map"))?
            .entry(stream_key.clone())
            .or_default()
            .clone())
    }
}

fn lock(stream: &SharedStream) -> Result<MutexGuard<'_, StreamState>, DomainError> {
    stream.lock().map_err(|_| poisoned("stream"))
}

#[async_trait]
impl TransactionBackend for InMemoryBackend {
    async fn read_records(
        &self,
        stream_key: &StreamKey,
    ) -> Result<Vec<RecordOperation>, DomainError> {
        match self.existing(stream_key)? {
            Some(stream) => Ok(lock(&stream)?.records.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn read_header(
        &self,
        stream_key: &StreamKey,
    ) -> Result<Option<AggregateVersion>, DomainError> {
        match self.existing(stream_key)? {
            Some(stream) => Ok(lock(&stream)?.version),
            None => Ok(None),
        }
    }

    async fn contains_initiator(
        &self,
        stream_key: &StreamKey,
        initiator_id: Uuid,
    ) -> Result<bool, DomainError> {
        match self.existing(stream_key)? {
            Some(stream) => Ok(lock(&stream)?
                .records
                .iter()
                .any(|record| record.initiator_id() == initiator_id)),
            None => Ok(false),
        }
    }

    async fn submit(&self, transaction: &StreamTransaction) -> Result<SubmitOutcome, DomainError> {
        let stream = self.existing_or_new(&transaction.stream_key)?;
        let mut state = lock(&stream)?;

        if !state.header_matches(transaction.header) || !state.keys_free(transaction) {
            return Ok(SubmitOutcome::Conflict);
        }

        for event in transaction.events() {
            state.positions.insert(event.position);
            state.event_ids.insert(event.event_id);
        }
        state.records.extend(transaction.records.iter().cloned());
        state.version = Some(transaction.header.new_version());
        Ok(SubmitOutcome::Committed)
    }
}
