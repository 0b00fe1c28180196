//! Aggregate repository.
//!
//! Ties the event database port to the applier: `get` rebuilds an aggregate
//! from its stream, `save` validates the caller's expected version and hands
//! the pending events to the database.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::aggregate::{Aggregate, Loaded};
use crate::applier;
use crate::database::{EventDatabase, StreamKey, StreamKeyStrategy, TypeNameStreamKeys};
use crate::error::DomainError;
use crate::event::{AGGREGATE_ID_PROPERTY, AGGREGATE_TYPE_PROPERTY, WriteContext};
use crate::version::{AggregateVersion, ExpectedVersion};

/// Loads and saves aggregates of type `A`.
pub struct Repository<A> {
    database: Arc<dyn EventDatabase>,
    stream_keys: Arc<dyn StreamKeyStrategy>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Self {
            database: Arc::clone(&self.database),
            stream_keys: Arc::clone(&self.stream_keys),
            _aggregate: PhantomData,
        }
    }
}

impl<A: Aggregate> Repository<A> {
    /// Creates a repository using `"{TypeName}-{Id}"` stream keys.
    #[must_use]
    pub fn new(database: Arc<dyn EventDatabase>) -> Self {
        Self {
            database,
            stream_keys: Arc::new(TypeNameStreamKeys),
            _aggregate: PhantomData,
        }
    }

    /// Replaces the stream key strategy.
    #[must_use]
    pub fn with_stream_keys(mut self, stream_keys: impl StreamKeyStrategy + 'static) -> Self {
        self.stream_keys = Arc::new(stream_keys);
        self
    }

    /// The stream key of aggregate `id`.
    #[must_use]
    pub fn stream_key(&self, id: &A::Id) -> StreamKey {
        self.stream_keys.stream_key(A::AGGREGATE_TYPE, &id.to_string())
    }

    /// Loads an aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the stream is empty, or the
    /// error of the underlying read or event decoding.
    pub async fn get(&self, id: &A::Id) -> Result<Loaded<A>, DomainError> {
        self.try_get(id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id: id.to_string(),
            })
    }

    /// Loads an aggregate, returning `None` if the stream is empty.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying read or event decoding.
    pub async fn try_get(&self, id: &A::Id) -> Result<Option<Loaded<A>>, DomainError> {
        let stream_key = self.stream_key(id);
        let events = self.database.read(&stream_key).await?;
        if events.is_empty() {
            return Ok(None);
        }

        let mut aggregate = A::blank(id);
        let applied = applier::apply_events(&mut aggregate, &events, false)?;
        let version = AggregateVersion::from_event_count(events.len());
        tracing::debug!(
            %stream_key,
            events = events.len(),
            applied,
            %version,
            "rehydrated aggregate"
        );

        Ok(Some(Loaded::at_version(aggregate, version)))
    }

    /// Persists the pending events of `loaded`.
    ///
    /// The expected version is checked against the version `loaded` was
    /// retrieved at before storage is touched. A save with nothing pending
    /// succeeds without a write. On success the pending events are cleared
    /// and the retrieved version moves to the new stream version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnexpectedVersion` if the expected version does
    /// not hold, or whatever the event database reports.
    pub async fn save(
        &self,
        id: &A::Id,
        loaded: &mut Loaded<A>,
        expected_version: ExpectedVersion,
        context: &WriteContext,
    ) -> Result<(), DomainError> {
        let stream_key = self.stream_key(id);
        let retrieved = loaded.retrieved_version();

        let mismatch = match expected_version {
            ExpectedVersion::None => retrieved.exists(),
            ExpectedVersion::Exact(expected) => !retrieved.exists() || expected != retrieved,
            ExpectedVersion::Any => false,
        };
        if mismatch {
            return Err(DomainError::UnexpectedVersion {
                stream_key: stream_key.to_string(),
                expected: expected_version,
                retrieved,
                actual: None,
            });
        }

        if loaded.recorder().is_empty() {
            tracing::debug!(%stream_key, "nothing to save");
            return Ok(());
        }

        let events = loaded.recorder().to_new_events()?;
        let event_count = events.len();
        let mut context = context.clone();
        context
            .custom_properties
            .entry(AGGREGATE_TYPE_PROPERTY.to_owned())
            .or_insert_with(|| A::AGGREGATE_TYPE.to_owned());
        context
            .custom_properties
            .entry(AGGREGATE_ID_PROPERTY.to_owned())
            .or_insert_with(|| id.to_string());

        let new_version = self
            .database
            .write(&stream_key, events, retrieved, expected_version, &context)
            .await?;

        loaded.clear_uncommitted_events();
        loaded.set_retrieved_version(new_version);
        tracing::info!(
            %stream_key,
            events = event_count,
            %expected_version,
            %new_version,
            "saved aggregate"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use super::*;
    use crate::aggregate::EventRecorder;
    use crate::applier::HandlerRegistry;
    use crate::event::{DomainEvent, NewEvent, StoredEvent};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Opened {
        owner: String,
    }

    impl DomainEvent for Opened {
        const EVENT_TYPE: &'static str = "Opened";
    }

    #[derive(Debug, Default)]
    struct Account {
        owner: Option<String>,
        recorder: EventRecorder,
    }

    impl Account {
        fn on_opened(&mut self, event: &Opened) {
            self.owner = Some(event.owner.clone());
        }
    }

    impl Aggregate for Account {
        const AGGREGATE_TYPE: &'static str = "Account";
        type Id = Uuid;

        fn blank(_id: &Uuid) -> Self {
            Self::default()
        }

        fn register_handlers(handlers: &mut HandlerRegistry<Self>) {
            handlers.on(Self::on_opened);
        }

        fn recorder(&self) -> &EventRecorder {
            &self.recorder
        }

        fn recorder_mut(&mut self) -> &mut EventRecorder {
            &mut self.recorder
        }
    }

    type WriteCall = (StreamKey, Vec<NewEvent>, AggregateVersion, ExpectedVersion, WriteContext);

    #[derive(Default)]
    struct MockEventDatabase {
        stream: Vec<StoredEvent>,
        writes: Mutex<Vec<WriteCall>>,
    }

    impl MockEventDatabase {
        fn with_events(count: usize) -> Self {
            let stream = (0..count)
                .map(|position| StoredEvent {
                    event_id: Uuid::new_v4(),
                    stream_key: StreamKey::new("Account-x"),
                    position: i64::try_from(position).unwrap(),
                    event_type: Opened::EVENT_TYPE.to_owned(),
                    payload: serde_json::json!({"owner": format!("owner-{position}")}),
                    conversation_id: Uuid::nil(),
                    initiator_id: Uuid::nil(),
                    custom_properties: BTreeMap::new(),
                    occurred_at: Utc::now(),
                })
                .collect();
            Self {
                stream,
                writes: Mutex::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<WriteCall> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventDatabase for MockEventDatabase {
        async fn read(&self, _stream_key: &StreamKey) -> Result<Vec<StoredEvent>, DomainError> {
            Ok(self.stream.clone())
        }

        async fn write(
            &self,
            stream_key: &StreamKey,
            events: Vec<NewEvent>,
            retrieved_version: AggregateVersion,
            expected_version: ExpectedVersion,
            context: &WriteContext,
        ) -> Result<AggregateVersion, DomainError> {
            let new_version = retrieved_version.advanced_by(events.len());
            self.writes.lock().unwrap().push((
                stream_key.clone(),
                events,
                retrieved_version,
                expected_version,
                context.clone(),
            ));
            Ok(new_version)
        }
    }

    fn repository(database: &Arc<MockEventDatabase>) -> Repository<Account> {
        Repository::new(database.clone())
    }

    #[tokio::test]
    async fn test_get_sets_retrieved_version_from_event_count() {
        // Arrange
        let database = Arc::new(MockEventDatabase::with_events(3));
        let repo = repository(&database);

        // Act
        let loaded = repo.get(&Uuid::new_v4()).await.unwrap();

        // Assert
        assert_eq!(loaded.retrieved_version(), AggregateVersion::new(2).unwrap());
        assert_eq!(loaded.owner.as_deref(), Some("owner-2"));
        assert!(loaded.uncommitted_events().is_empty());
    }

    #[tokio::test]
    async fn test_get_fails_with_not_found_for_empty_stream() {
        let database = Arc::new(MockEventDatabase::default());
        let repo = repository(&database);
        let id = Uuid::new_v4();

        match repo.get(&id).await {
            Err(DomainError::AggregateNotFound {
                aggregate_type,
                aggregate_id,
            }) => {
                assert_eq!(aggregate_type, "Account");
                assert_eq!(aggregate_id, id.to_string());
            }
            other => panic!("expected AggregateNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_try_get_returns_none_for_empty_stream() {
        let database = Arc::new(MockEventDatabase::default());
        let repo = repository(&database);

        assert!(repo.try_get(&Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_with_none_rejects_existing_stream() {
        // Arrange
        let database = Arc::new(MockEventDatabase::with_events(1));
        let repo = repository(&database);
        let id = Uuid::new_v4();
        let mut loaded = repo.get(&id).await.unwrap();
        loaded
            .apply(Opened {
                owner: "ann".to_owned(),
            })
            .unwrap();

        // Act
        let result = repo
            .save(&id, &mut loaded, ExpectedVersion::None, &WriteContext::default())
            .await;

        // Assert
        match result {
            Err(DomainError::UnexpectedVersion {
                expected,
                retrieved,
                actual,
                ..
            }) => {
                assert_eq!(expected, ExpectedVersion::None);
                assert_eq!(retrieved, AggregateVersion::new(0).unwrap());
                assert!(actual.is_none());
            }
            other => panic!("expected UnexpectedVersion, got {other:?}"),
        }
        assert!(database.writes().is_empty());
        assert_eq!(loaded.uncommitted_events().len(), 1);
    }

    #[tokio::test]
    async fn test_save_with_exact_rejects_mismatched_version() {
        let database = Arc::new(MockEventDatabase::with_events(3));
        let repo = repository(&database);
        let id = Uuid::new_v4();
        let mut loaded = repo.get(&id).await.unwrap();
        let expected = ExpectedVersion::exact(1).unwrap();

        let result = repo
            .save(&id, &mut loaded, expected, &WriteContext::default())
            .await;

        match result {
            Err(DomainError::UnexpectedVersion {
                expected: reported,
                retrieved,
                ..
            }) => {
                assert_eq!(reported, expected);
                assert_eq!(retrieved, AggregateVersion::new(2).unwrap());
            }
            other => panic!("expected UnexpectedVersion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_save_with_exact_rejects_new_aggregate() {
        let database = Arc::new(MockEventDatabase::default());
        let repo = repository(&database);
        let mut loaded = Loaded::new(Account::default());

        let result = repo
            .save(
                &Uuid::new_v4(),
                &mut loaded,
                ExpectedVersion::exact(0).unwrap(),
                &WriteContext::default(),
            )
            .await;

        assert!(matches!(result, Err(DomainError::UnexpectedVersion { .. })));
    }

    #[tokio::test]
    async fn test_save_without_pending_events_skips_storage() {
        let database = Arc::new(MockEventDatabase::with_events(2));
        let repo = repository(&database);
        let id = Uuid::new_v4();
        let mut loaded = repo.get(&id).await.unwrap();

        repo.save(&id, &mut loaded, ExpectedVersion::Any, &WriteContext::default())
            .await
            .unwrap();

        assert!(database.writes().is_empty());
    }

    #[tokio::test]
    async fn test_save_forwards_baseline_and_augmented_properties() {
        // Arrange
        let database = Arc::new(MockEventDatabase::with_events(2));
        let repo = repository(&database);
        let id = Uuid::new_v4();
        let mut loaded = repo.get(&id).await.unwrap();
        loaded
            .apply(Opened {
                owner: "bo".to_owned(),
            })
            .unwrap();
        let context =
            WriteContext::new(Uuid::new_v4(), Uuid::new_v4()).with_property("tenant", "acme");

        // Act
        repo.save(
            &id,
            &mut loaded,
            ExpectedVersion::exact(1).unwrap(),
            &context,
        )
        .await
        .unwrap();

        // Assert
        let writes = database.writes();
        assert_eq!(writes.len(), 1);
        let (stream_key, events, retrieved, expected, written_context) = &writes[0];
        assert_eq!(stream_key.as_str(), format!("Account-{id}"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "Opened");
        assert_eq!(*retrieved, AggregateVersion::new(1).unwrap());
        assert_eq!(*expected, ExpectedVersion::exact(1).unwrap());
        assert_eq!(written_context.initiator_id, context.initiator_id);
        assert_eq!(
            written_context.custom_properties.get("tenant").map(String::as_str),
            Some("acme")
        );
        assert_eq!(
            written_context
                .custom_properties
                .get(AGGREGATE_TYPE_PROPERTY)
                .map(String::as_str),
            Some("Account")
        );
        assert_eq!(
            written_context.custom_properties.get(AGGREGATE_ID_PROPERTY),
            Some(&id.to_string())
        );
        assert!(!context.custom_properties.contains_key(AGGREGATE_TYPE_PROPERTY));

        assert!(loaded.uncommitted_events().is_empty());
        assert_eq!(loaded.retrieved_version(), AggregateVersion::new(2).unwrap());
    }

    #[tokio::test]
    async fn test_custom_stream_key_strategy_is_used() {
        let database = Arc::new(MockEventDatabase::default());
        let repo = repository(&database)
            .with_stream_keys(|_: &str, id: &str| StreamKey::new(format!("acct:{id}")));
        let id = Uuid::new_v4();

        assert_eq!(repo.stream_key(&id).as_str(), format!("acct:{id}"));
    }
}
