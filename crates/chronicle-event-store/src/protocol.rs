//! The transactional write protocol.
//!
//! [`TransactionalEventDatabase`] turns a batch of new events into one atomic
//! [`StreamTransaction`] and classifies conflicts: a retried write that
//! already landed succeeds quietly, an `Any` write may re-plan on the actual
//! version, and everything else surfaces as `UnexpectedVersion`.

use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::database::{EventDatabase, StreamKey};
use chronicle_core::error::DomainError;
use chronicle_core::event::{NewEvent, StoredEvent, WriteContext};
use chronicle_core::identity::{IdGenerator, RandomIdGenerator, idempotent_event_id};
use chronicle_core::version::{AggregateVersion, ExpectedVersion};
use chronicle_dispatch::EventDispatcher;
use uuid::Uuid;

use crate::config::EventStoreConfig;
use crate::ordering::StreamGates;
use crate::packing::{self, RecordPlan};
use crate::transaction::{
    EventPacket, HeaderOperation, RecordOperation, StreamTransaction, SubmitOutcome,
    TransactionBackend,
};

/// Event database running the packing and retry protocol over a
/// [`TransactionBackend`].
pub struct TransactionalEventDatabase<B> {
    backend: B,
    config: EventStoreConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    dispatcher: Option<EventDispatcher>,
    gates: StreamGates,
}

impl<B: TransactionBackend> TransactionalEventDatabase<B> {
    /// Creates a database over `backend` using the system clock and random
    /// identities.
    #[must_use]
    pub fn new(backend: B, config: EventStoreConfig) -> Self {
        Self {
            backend,
            config,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIdGenerator),
            dispatcher: None,
            gates: StreamGates::default(),
        }
    }

    /// Replaces the timestamp source.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces the source of non-idempotent identities.
    #[must_use]
    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Publishes committed events to `dispatcher`. Writes to the same stream
    /// are then serialized, so each stream is published in commit order.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The active configuration.
    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    fn event_id(&self, initiator_id: Uuid, index: usize) -> Result<Uuid, DomainError> {
        if self.config.idempotency_enabled && !initiator_id.is_nil() {
            idempotent_event_id(initiator_id, index)
        } else {
            Ok(self.ids.next_id())
        }
    }

    /// Builds the transaction appending `events` after `baseline`.
    fn prepare(
        &self,
        stream_key: &StreamKey,
        events: &[NewEvent],
        baseline: AggregateVersion,
        context: &WriteContext,
    ) -> Result<StreamTransaction, DomainError> {
        let plan = packing::plan(events.len(), &self.config)?;
        let occurred_at = self.clock.now();

        let stored = events
            .iter()
            .enumerate()
            .map(|(index, event)| -> Result<StoredEvent, DomainError> {
                Ok(StoredEvent {
                    event_id: self.event_id(context.initiator_id, index)?,
                    stream_key: stream_key.clone(),
                    position: baseline.advanced_by(index + 1).value(),
                    event_type: event.event_type.clone(),
                    payload: event.payload.clone(),
                    conversation_id: context.conversation_id,
                    initiator_id: context.initiator_id,
                    custom_properties: context.custom_properties.clone(),
                    occurred_at,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let records = match plan {
            RecordPlan::Individual => stored.into_iter().map(RecordOperation::Event).collect(),
            RecordPlan::Packed { packets } => packing::split_evenly(stored, packets)
                .into_iter()
                .filter_map(EventPacket::new)
                .map(RecordOperation::Packet)
                .collect(),
        };

        let new = baseline.advanced_by(events.len());
        let header = if baseline.exists() {
            HeaderOperation::Advance {
                expected: baseline,
                new,
            }
        } else {
            HeaderOperation::Create { version: new }
        };

        Ok(StreamTransaction {
            stream_key: stream_key.clone(),
            header,
            records,
        })
    }

    fn publish(&self, transaction: &StreamTransaction) {
        if let Some(dispatcher) = &self.dispatcher {
            let events: Vec<StoredEvent> = transaction.events().cloned().collect();
            dispatcher.publish(&events);
        }
    }
}

#[async_trait]
impl<B: TransactionBackend> EventDatabase for TransactionalEventDatabase<B> {
    async fn read(&self, stream_key: &StreamKey) -> Result<Vec<StoredEvent>, DomainError> {
        let records = self.backend.read_records(stream_key).await?;
        Ok(records
            .into_iter()
            .flat_map(|record| match record {
                RecordOperation::Event(event) => vec![event],
                RecordOperation::Packet(packet) => packet.into_events(),
            })
            .collect())
    }

    async fn write(
        &self,
        stream_key: &StreamKey,
        events: Vec<NewEvent>,
        retrieved_version: AggregateVersion,
        expected_version: ExpectedVersion,
        context: &WriteContext,
    ) -> Result<AggregateVersion, DomainError> {
        if events.is_empty() {
            return Ok(retrieved_version);
        }

        // Commit groups of one stream are published in the order they were applied.
        let _pass = if self.dispatcher.is_some() {
            Some(self.gates.enter(stream_key).await)
        } else {
            None
        };
        let mut baseline = retrieved_version;
        let mut retries = 0;
        loop {
            let transaction = self.prepare(stream_key, &events, baseline, context)?;
            match self.backend.submit(&transaction).await? {
                SubmitOutcome::Committed => {
                    let version = transaction.header.new_version();
                    tracing::debug!(
                        %stream_key,
                        events = events.len(),
                        operations = transaction.operation_count(),
                        %version,
                        "stream transaction committed"
                    );
                    self.publish(&transaction);
                    return Ok(version);
                }
                SubmitOutcome::Conflict => {
                    let initiator_id = context.initiator_id;
                    if !initiator_id.is_nil()
                        && self.backend.contains_initiator(stream_key, initiator_id).await?
                    {
                        let current = self
                            .backend
                            .read_header(stream_key)
                            .await?
                            .unwrap_or(AggregateVersion::DOES_NOT_EXIST);
                        tracing::info!(
                            %stream_key,
                            %initiator_id,
                            "write already applied; skipping duplicate"
                        );
                        return Ok(current);
                    }

                    let actual = self.backend.read_header(stream_key).await?;
                    match (expected_version, actual) {
                        (ExpectedVersion::Any, Some(actual))
                            if retries < self.config.any_version_retry_limit =>
                        {
                            retries += 1;
                            tracing::warn!(
                                %stream_key,
                                %baseline,
                                %actual,
                                attempt = retries,
                                "version conflict on any-version write; retrying"
                            );
                            baseline = actual;
                        }
                        _ => {
                            tracing::warn!(
                                %stream_key,
                                expected = %expected_version,
                                retrieved = %retrieved_version,
                                actual = ?actual,
                                "unexpected stream version"
                            );
                            return Err(DomainError::UnexpectedVersion {
                                stream_key: stream_key.to_string(),
                                expected: expected_version,
                                retrieved: retrieved_version,
                                actual,
                            });
                        }
                    }
                }
            }
        }
    }
}
