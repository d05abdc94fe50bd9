//! Crash-recovery behaviour of the outbox publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, IdempotencyKey, Money, TransactionId};
use domain::{LineItem, Transaction};
use outbox::{InMemoryBroker, OutboxPublisher, PublishError, PublisherConfig};
use store::{
    InMemoryStore, OutboxEvent, OutboxStore, StoreError, TransactionStore, UnitOfWork,
};
use uuid::Uuid;

/// Store wrapper whose acknowledgment write fails until `healthy` is set,
/// standing in for a process that dies between broker ack and bookkeeping.
struct CrashingStore {
    inner: InMemoryStore,
    healthy: AtomicBool,
}

#[async_trait]
impl OutboxStore for CrashingStore {
    async fn fetch_unpublished(&self, limit: usize) -> store::Result<Vec<OutboxEvent>> {
        self.inner.fetch_unpublished(limit).await
    }

    async fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> store::Result<()> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(StoreError::CorruptRow("connection lost".to_string()));
        }
        self.inner.mark_published(id, at).await
    }

    async fn events_for_aggregate(&self, aggregate_id: Uuid) -> store::Result<Vec<OutboxEvent>> {
        self.inner.events_for_aggregate(aggregate_id).await
    }

    async fn unpublished_count(&self) -> store::Result<u64> {
        self.inner.unpublished_count().await
    }
}

async fn commit_completed_transaction(store: &InMemoryStore) -> TransactionId {
    let now = Utc::now();
    let mut tx = Transaction::create(
        TransactionId::new(),
        IdempotencyKey::new("order-1"),
        vec![LineItem::new("SKU-1", "WH-1", 2, Money::from_cents(500))],
        now,
        now,
    )
    .unwrap();
    tx.mark_stock_reserved(now).unwrap();
    tx.await_payment("PAY-0001".into(), now).unwrap();
    tx.mark_paid(now).unwrap();
    let event = tx.complete(now).unwrap();

    store
        .commit(
            UnitOfWork::new()
                .insert_transaction(tx.clone())
                .enqueue(OutboxEvent::from_transaction_event(&event, now).unwrap()),
        )
        .await
        .unwrap();
    tx.id()
}

#[tokio::test]
async fn event_committed_before_crash_is_published_after_restart() {
    let inner = InMemoryStore::new();
    let transaction_id = commit_completed_transaction(&inner).await;
    let store = Arc::new(CrashingStore {
        inner: inner.clone(),
        healthy: AtomicBool::new(false),
    });
    let broker = Arc::new(InMemoryBroker::new());

    // First process: the broker acks but the ack is never recorded.
    let before_crash =
        OutboxPublisher::new(store.clone(), broker.clone(), PublisherConfig::default());
    let result = before_crash.publish_once().await;
    assert!(matches!(result, Err(PublishError::Store(_))));
    assert_eq!(broker.delivered_count(), 1);
    assert_eq!(inner.unpublished_count().await.unwrap(), 1);

    // Restart: the pending event goes out again and is then recorded.
    store.healthy.store(true, Ordering::SeqCst);
    let after_restart =
        OutboxPublisher::new(store.clone(), broker.clone(), PublisherConfig::default());
    let report = after_restart.publish_once().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(inner.unpublished_count().await.unwrap(), 0);

    // Nothing further once the ack is on disk.
    let report = after_restart.publish_once().await.unwrap();
    assert_eq!(report.attempted(), 0);
    assert_eq!(broker.delivered_count(), 2);

    // Consumers see one logical event.
    let unique = broker.deduplicated();
    assert_eq!(unique.len(), 1);
    assert_eq!(
        unique[0].dedup_key,
        format!("{transaction_id}:transaction.completed")
    );
    assert_eq!(unique[0].payload["type"], "transaction.completed");
    assert_eq!(unique[0].payload["data"]["outcome"], "COMPLETED");
}

#[tokio::test]
async fn transient_broker_failure_is_retried_next_pass() {
    let store = InMemoryStore::new();
    commit_completed_transaction(&store).await;
    let broker = InMemoryBroker::new();
    broker.fail_next(1);

    let publisher = OutboxPublisher::new(
        Arc::new(store.clone()),
        Arc::new(broker.clone()),
        PublisherConfig::default(),
    );

    let first = publisher.publish_once().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(store.unpublished_count().await.unwrap(), 1);

    let second = publisher.publish_once().await.unwrap();
    assert_eq!(second.delivered, 1);
    assert_eq!(broker.delivered_count(), 1);
}
