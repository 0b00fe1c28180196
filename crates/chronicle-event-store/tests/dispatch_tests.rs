//! Committed writes reaching in-process subscriptions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chronicle_core::aggregate::{Aggregate, Loaded};
use chronicle_core::database::{EventDatabase, StreamKey};
use chronicle_core::error::DomainError;
use chronicle_core::event::{NewEvent, StoredEvent, WriteContext};
use chronicle_core::repository::Repository;
use chronicle_core::version::{AggregateVersion, ExpectedVersion};
use chronicle_dispatch::{
    BatchHandler, Cancellation, DispatcherConfig, EventDispatcher, EventHandler, HandlerError,
    Subscription,
};
use chronicle_event_store::{
    EventStoreConfig, InMemoryBackend, RecordOperation, StreamTransaction, SubmitOutcome,
    TransactionBackend, TransactionalEventDatabase,
};
use chronicle_test_support::init_test_tracing;
use chronicle_test_support::sample::{Inventory, ItemRemoved};
use tokio::sync::mpsc;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

struct Positions(mpsc::UnboundedSender<i64>);

#[async_trait]
impl EventHandler for Positions {
    async fn handle(&self, event: &StoredEvent, _: &Cancellation) -> Result<(), HandlerError> {
        let _ = self.0.send(event.position);
        Ok(())
    }
}

struct Removals(mpsc::UnboundedSender<u32>);

#[async_trait]
impl EventHandler for Removals {
    async fn handle(&self, event: &StoredEvent, _: &Cancellation) -> Result<(), HandlerError> {
        let removed: ItemRemoved = event.decode()?;
        let _ = self.0.send(removed.quantity);
        Ok(())
    }
}

struct CommitSizes(mpsc::UnboundedSender<usize>);

#[async_trait]
impl BatchHandler for CommitSizes {
    async fn handle_batch(
        &self,
        events: &[StoredEvent],
        _: &Cancellation,
    ) -> Result<(), HandlerError> {
        let _ = self.0.send(events.len());
        Ok(())
    }
}

/// Commits at once but delays the acknowledgement of its first submit.
struct SlowFirstAck {
    inner: InMemoryBackend,
    delay_next: AtomicBool,
}

#[async_trait]
impl TransactionBackend for SlowFirstAck {
    async fn read_records(
        &self,
        stream_key: &StreamKey,
    ) -> Result<Vec<RecordOperation>, DomainError> {
        self.inner.read_records(stream_key).await
    }

    async fn read_header(
        &self,
        stream_key: &StreamKey,
    ) -> Result<Option<AggregateVersion>, DomainError> {
        self.inner.read_header(stream_key).await
    }

    async fn contains_initiator(
        &self,
        stream_key: &StreamKey,
        initiator_id: Uuid,
    ) -> Result<bool, DomainError> {
        self.inner.contains_initiator(stream_key, initiator_id).await
    }

    async fn submit(&self, transaction: &StreamTransaction) -> Result<SubmitOutcome, DomainError> {
        let outcome = self.inner.submit(transaction).await?;
        if self.delay_next.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(outcome)
    }
}

fn item_added() -> Vec<NewEvent> {
    vec![NewEvent {
        event_type: "ItemAdded".to_owned(),
        payload: serde_json::json!({ "item": "apple", "quantity": 1 }),
    }]
}

async fn next<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> T {
    match tokio::time::timeout(WAIT, receiver.recv()).await {
        Ok(Some(value)) => value,
        Ok(None) => panic!("channel closed"),
        Err(_) => panic!("timed out waiting for delivery"),
    }
}

#[tokio::test]
async fn test_committed_events_are_published_to_observing_subscriptions() {
    // Arrange
    init_test_tracing();
    let (positions_tx, mut positions) = mpsc::unbounded_channel();
    let (removals_tx, mut removals) = mpsc::unbounded_channel();
    let (commits_tx, mut commits) = mpsc::unbounded_channel();
    let (orders_tx, mut orders) = mpsc::unbounded_channel();
    let dispatcher = EventDispatcher::builder(DispatcherConfig::default())
        .subscription(
            Subscription::new("stock")
                .observing("Inventory-")
                .on_batch(CommitSizes(commits_tx))
                .on_any(Positions(positions_tx))
                .on_event_type("ItemRemoved", Removals(removals_tx)),
        )
        .subscription(
            Subscription::new("orders")
                .observing("Order-")
                .on_any(Positions(orders_tx)),
        )
        .start()
        .unwrap();
    let database =
        TransactionalEventDatabase::new(InMemoryBackend::new(), EventStoreConfig::default())
            .with_dispatcher(dispatcher.clone());
    let repository: Repository<Inventory> = Repository::new(Arc::new(database));
    let id = Uuid::new_v4();
    let mut inventory = Loaded::new(Inventory::new(id));
    inventory.add("apple", 5).unwrap();
    inventory.remove("apple", 2).unwrap();

    // Act
    repository
        .save(&id, &mut inventory, ExpectedVersion::None, &WriteContext::default())
        .await
        .unwrap();
    inventory.remove("apple", 1).unwrap();
    repository
        .save(&id, &mut inventory, ExpectedVersion::Any, &WriteContext::default())
        .await
        .unwrap();

    // Assert
    assert_eq!(next(&mut commits).await, 2);
    assert_eq!(next(&mut commits).await, 1);
    for expected in 0..3 {
        assert_eq!(next(&mut positions).await, expected);
    }
    assert_eq!(next(&mut removals).await, 2);
    assert_eq!(next(&mut removals).await, 1);
    dispatcher.shutdown().await;
    assert!(orders.try_recv().is_err());
    assert!(inventory.uncommitted_events().is_empty());
}

#[tokio::test]
async fn test_rejected_writes_are_not_published() {
    let (positions_tx, mut positions) = mpsc::unbounded_channel();
    let dispatcher = EventDispatcher::builder(DispatcherConfig::default())
        .subscription(Subscription::new("stock").on_any(Positions(positions_tx)))
        .start()
        .unwrap();
    let database = Arc::new(
        TransactionalEventDatabase::new(InMemoryBackend::new(), EventStoreConfig::default())
            .with_dispatcher(dispatcher.clone()),
    );
    let repository: Repository<Inventory> = Repository::new(database);
    let id = Uuid::new_v4();
    let mut first = Loaded::new(Inventory::new(id));
    first.add("apple", 1).unwrap();
    let mut second = Loaded::new(Inventory::new(id));
    second.add("pear", 1).unwrap();

    let writer_a = WriteContext::new(Uuid::new_v4(), Uuid::new_v4());
    let writer_b = WriteContext::new(Uuid::new_v4(), Uuid::new_v4());

    repository
        .save(&id, &mut first, ExpectedVersion::None, &writer_a)
        .await
        .unwrap();
    let rejected = repository
        .save(&id, &mut second, ExpectedVersion::None, &writer_b)
        .await;

    assert!(rejected.is_err());
    assert_eq!(next(&mut positions).await, 0);
    dispatcher.shutdown().await;
    assert!(positions.try_recv().is_err());
}

#[tokio::test]
async fn test_late_acknowledged_commit_is_still_published_first() {
    // Arrange
    let (positions_tx, mut positions) = mpsc::unbounded_channel();
    let dispatcher = EventDispatcher::builder(DispatcherConfig::default())
        .subscription(Subscription::new("stock").on_any(Positions(positions_tx)))
        .start()
        .unwrap();
    let backend = SlowFirstAck {
        inner: InMemoryBackend::new(),
        delay_next: AtomicBool::new(true),
    };
    let database = Arc::new(
        TransactionalEventDatabase::new(backend, EventStoreConfig::default())
            .with_dispatcher(dispatcher.clone()),
    );
    let key = StreamKey::new("Inventory-1");
    let first = {
        let database = Arc::clone(&database);
        let key = key.clone();
        tokio::spawn(async move {
            database
                .write(
                    &key,
                    item_added(),
                    AggregateVersion::DOES_NOT_EXIST,
                    ExpectedVersion::None,
                    &WriteContext::default(),
                )
                .await
        })
    };
    while database.backend().inner.read_header(&key).await.unwrap().is_none() {
        tokio::task::yield_now().await;
    }

    // Act
    let committed = AggregateVersion::new(0).unwrap();
    database
        .write(
            &key,
            item_added(),
            committed,
            ExpectedVersion::Exact(committed),
            &WriteContext::default(),
        )
        .await
        .unwrap();
    first.await.unwrap().unwrap();

    // Assert
    assert_eq!(next(&mut positions).await, 0);
    assert_eq!(next(&mut positions).await, 1);
    dispatcher.shutdown().await;
}
