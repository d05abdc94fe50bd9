use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CallbackId, EventId, GatewayReference, IdempotencyKey, ReservationId, TransactionId, Version,
};
use domain::{
    PaymentCallback, PendingCallback, ReservationStatus, StockKey, StockLevel, StockReservation,
    Transaction,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::{
    OutboxEvent, Result, StoreError, UnitOfWork,
    store::{OutboxStore, StockLedger, TransactionStore, record_reservation_outcome},
    unit_of_work::TransactionWrite,
};

type PairLock = Arc<Mutex<StockLevel>>;

#[derive(Default)]
struct Tables {
    transactions: HashMap<TransactionId, Transaction>,
    by_idempotency_key: HashMap<IdempotencyKey, TransactionId>,
    by_gateway_reference: HashMap<GatewayReference, TransactionId>,
    reservations: HashMap<ReservationId, StockReservation>,
    outbox: Vec<OutboxEvent>,
    last_sequence: i64,
    callbacks: HashMap<CallbackId, PaymentCallback>,
    pending_callbacks: HashMap<CallbackId, PendingCallback>,
}

/// In-memory store implementation.
///
/// Each (warehouse, product) pair has its own lock. A unit of work locks the
/// pairs it touches in key order, checks availability, and only then takes the
/// table lock to apply its writes, so reservations on unrelated pairs never
/// wait on each other's stock checks.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    stock: Arc<RwLock<HashMap<StockKey, PairLock>>>,
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of outbox events stored.
    pub async fn outbox_len(&self) -> usize {
        self.tables.read().await.outbox.len()
    }

    /// Returns the number of recorded payment callbacks.
    pub async fn callback_count(&self) -> usize {
        self.tables.read().await.callbacks.len()
    }

    /// Clears all state.
    pub async fn clear(&self) {
        self.stock.write().await.clear();
        *self.tables.write().await = Tables::default();
    }

    async fn existing_pair(&self, key: &StockKey) -> Option<PairLock> {
        self.stock.read().await.get(key).cloned()
    }

    async fn pair(&self, key: &StockKey) -> PairLock {
        if let Some(lock) = self.existing_pair(key).await {
            return lock;
        }
        let mut stock = self.stock.write().await;
        stock
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(StockLevel::empty(key))))
            .clone()
    }

    /// Locks every pair the unit touches, in key order.
    async fn lock_pairs(
        &self,
        keys: BTreeSet<StockKey>,
    ) -> HashMap<StockKey, OwnedMutexGuard<StockLevel>> {
        let mut guards = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(lock) = self.existing_pair(&key).await {
                guards.insert(key, lock.lock_owned().await);
            }
        }
        guards
    }

    async fn apply(&self, uow: UnitOfWork) -> Result<Option<Version>> {
        let demand = uow.demand();

        let mut keys: BTreeSet<StockKey> = demand.keys().cloned().collect();
        {
            // Reservation keys never change, so reading them before locking is safe.
            let tables = self.tables.read().await;
            for settlement in uow.settlements() {
                let reservation = tables
                    .reservations
                    .get(&settlement.reservation_id)
                    .ok_or(StoreError::ReservationNotFound(settlement.reservation_id))?;
                keys.insert(reservation.key());
            }
        }

        let mut levels = self.lock_pairs(keys).await;

        let reserve_check = demand.iter().try_for_each(|(key, requested)| {
            let available = levels.get(key).map(|level| level.available()).unwrap_or(0);
            if *requested > available {
                Err(StoreError::InsufficientStock {
                    warehouse_id: key.warehouse_id.clone(),
                    product_id: key.product_id.clone(),
                    requested: *requested,
                    available,
                })
            } else {
                Ok(())
            }
        });
        if let Err(err) = reserve_check {
            record_reservation_outcome(uow.reservations().len(), &Err(&err));
            return Err(err);
        }

        let mut tables = self.tables.write().await;
        validate(&tables, &uow)?;
        record_reservation_outcome(uow.reservations().len(), &Ok(()));

        let parts = uow.into_parts();

        for reservation in parts.reservations {
            if let Some(level) = levels.get_mut(&reservation.key()) {
                level.try_reserve(u64::from(reservation.quantity));
            }
            tables.reservations.insert(reservation.id, reservation);
        }

        let now = Utc::now();
        for settlement in parts.settlements {
            let Some(reservation) = tables.reservations.get_mut(&settlement.reservation_id) else {
                continue;
            };
            if reservation.status.is_terminal() {
                continue;
            }
            if let Some(level) = levels.get_mut(&reservation.key()) {
                let quantity = u64::from(reservation.quantity);
                match settlement.status {
                    ReservationStatus::Committed => level.commit(quantity),
                    ReservationStatus::Released => level.release(quantity),
                    ReservationStatus::Held => {}
                }
            }
            reservation.status = settlement.status;
            reservation.updated_at = now;
        }

        let new_version = parts.transaction.map(|write| {
            let (mut tx, version) = match write {
                TransactionWrite::Insert(tx) => (tx, Version::first()),
                TransactionWrite::Update(tx) => {
                    let version = tx.version().next();
                    (tx, version)
                }
            };
            tx.set_version(version);
            tables
                .by_idempotency_key
                .insert(tx.idempotency_key().clone(), tx.id());
            if let Some(reference) = tx.gateway_reference() {
                tables.by_gateway_reference.insert(reference.clone(), tx.id());
            }
            tables.transactions.insert(tx.id(), tx);
            version
        });

        for mut event in parts.outbox {
            tables.last_sequence += 1;
            event.sequence = tables.last_sequence;
            tables.outbox.push(event);
        }

        if let Some(callback) = parts.callback {
            tables.pending_callbacks.remove(&callback.callback_id);
            tables.callbacks.insert(callback.callback_id.clone(), callback);
        }

        Ok(new_version)
    }
}

/// Rejects the unit before anything is written.
fn validate(tables: &Tables, uow: &UnitOfWork) -> Result<()> {
    match uow.transaction() {
        Some(TransactionWrite::Insert(tx)) => {
            if tables.by_idempotency_key.contains_key(tx.idempotency_key()) {
                return Err(StoreError::DuplicateIdempotencyKey(
                    tx.idempotency_key().clone(),
                ));
            }
            if tables.transactions.contains_key(&tx.id()) {
                return Err(StoreError::ConcurrencyConflict {
                    transaction_id: tx.id(),
                    expected: Version::initial(),
                });
            }
        }
        Some(TransactionWrite::Update(tx)) => {
            let stored = tables
                .transactions
                .get(&tx.id())
                .ok_or(StoreError::TransactionNotFound(tx.id()))?;
            if stored.version() != tx.version() {
                return Err(StoreError::ConcurrencyConflict {
                    transaction_id: tx.id(),
                    expected: tx.version(),
                });
            }
        }
        None => {}
    }

    if let Some(callback) = uow.callback()
        && tables.callbacks.contains_key(&callback.callback_id)
    {
        return Err(StoreError::DuplicateCallback(callback.callback_id.clone()));
    }

    Ok(())
}

#[async_trait]
impl StockLedger for InMemoryStore {
    async fn receive_stock(&self, key: &StockKey, quantity: u64) -> Result<StockLevel> {
        let lock = self.pair(key).await;
        let mut level = lock.lock().await;
        level.receive(quantity);
        Ok(level.clone())
    }

    async fn stock_level(&self, key: &StockKey) -> Result<Option<StockLevel>> {
        match self.existing_pair(key).await {
            Some(lock) => Ok(Some(lock.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>> {
        Ok(self.tables.read().await.reservations.get(&id).cloned())
    }

    async fn reservations_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<StockReservation>> {
        let tables = self.tables.read().await;
        let mut reservations: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| (r.created_at, r.id));
        Ok(reservations)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StockReservation>> {
        let tables = self.tables.read().await;
        let mut expired: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| (r.expires_at, r.id));
        expired.truncate(limit);
        Ok(expired)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|e| !e.is_published())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: EventId, published_at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(event) = tables.outbox.iter_mut().find(|e| e.id == id)
            && event.published_at.is_none()
        {
            event.published_at = Some(published_at);
        }
        Ok(())
    }

    async fn events_for_aggregate(&self, aggregate_id: Uuid) -> Result<Vec<OutboxEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn unpublished_count(&self) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables.outbox.iter().filter(|e| !e.is_published()).count() as u64)
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    #[tracing::instrument(skip(self, uow))]
    async fn commit(&self, uow: UnitOfWork) -> Result<Option<Version>> {
        if uow.is_empty() {
            return Ok(None);
        }
        self.apply(uow).await
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.tables.read().await.transactions.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_idempotency_key
            .get(key)
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_gateway_reference
            .get(reference)
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    async fn find_callback(&self, id: &CallbackId) -> Result<Option<PaymentCallback>> {
        Ok(self.tables.read().await.callbacks.get(id).cloned())
    }

    async fn save_pending_callback(&self, callback: PendingCallback) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.callbacks.contains_key(&callback.callback_id) {
            tables
                .pending_callbacks
                .entry(callback.callback_id.clone())
                .or_insert(callback);
        }
        Ok(())
    }

    async fn pending_callbacks_for(
        &self,
        reference: &GatewayReference,
    ) -> Result<Vec<PendingCallback>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<_> = tables
            .pending_callbacks
            .values()
            .filter(|callback| &callback.gateway_reference == reference)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            (a.received_at, a.callback_id.as_str()).cmp(&(b.received_at, b.callback_id.as_str()))
        });
        Ok(pending)
    }

    async fn resolvable_pending_callbacks(&self, limit: usize) -> Result<Vec<PendingCallback>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<_> = tables
            .pending_callbacks
            .values()
            .filter(|callback| {
                tables
                    .by_gateway_reference
                    .contains_key(&callback.gateway_reference)
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            (a.received_at, a.callback_id.as_str()).cmp(&(b.received_at, b.callback_id.as_str()))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn discard_pending_callback(&self, id: &CallbackId) -> Result<()> {
        self.tables.write().await.pending_callbacks.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::Money;
    use domain::{LineItem, PaymentOutcome};
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;
    use crate::store::StockLedgerExt;

    fn key() -> StockKey {
        StockKey::new("WH-1", "SKU-1")
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::minutes(15)
    }

    async fn stocked(quantity: u64) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.receive_stock(&key(), quantity).await.unwrap();
        store
    }

    fn transaction(key: &str) -> Transaction {
        let now = Utc::now();
        Transaction::create(
            TransactionId::new(),
            IdempotencyKey::new(key),
            vec![LineItem::new("SKU-1", "WH-1", 1, Money::from_cents(100))],
            later(),
            now,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let store = stocked(5).await;
        let reservation = store
            .reserve(key(), 3, TransactionId::new(), later())
            .await
            .unwrap();

        let level = store.stock_level(&key()).await.unwrap().unwrap();
        assert_eq!(level.reserved, 3);
        assert_eq!(level.available(), 2);

        store.release(reservation.id).await.unwrap();
        let level = store.stock_level(&key()).await.unwrap().unwrap();
        assert_eq!(level.available(), 5);

        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Released);
    }

    #[tokio::test]
    async fn test_reserve_beyond_available_fails() {
        let store = stocked(2).await;
        let result = store.reserve(key(), 3, TransactionId::new(), later()).await;

        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            })
        ));
        let level = store.stock_level(&key()).await.unwrap().unwrap();
        assert_eq!(level.reserved, 0);
    }

    #[tokio::test]
    async fn test_unknown_pair_has_nothing_available() {
        let store = InMemoryStore::new();
        let result = store.reserve(key(), 1, TransactionId::new(), later()).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock { available: 0, .. })
        ));
        assert!(store.stock_level(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent() {
        let store = stocked(5).await;
        let reservation = store
            .reserve(key(), 2, TransactionId::new(), later())
            .await
            .unwrap();

        store.commit_reservation(reservation.id).await.unwrap();
        store.commit_reservation(reservation.id).await.unwrap();
        store.release(reservation.id).await.unwrap();

        let level = store.stock_level(&key()).await.unwrap().unwrap();
        assert_eq!(level.committed, 2);
        assert_eq!(level.reserved, 0);
        assert_eq!(level.available(), 3);
    }

    #[tokio::test]
    async fn test_combined_demand_is_all_or_nothing() {
        let store = stocked(3).await;
        store
            .receive_stock(&StockKey::new("WH-1", "SKU-2"), 10)
            .await
            .unwrap();

        let tx_id = TransactionId::new();
        let now = Utc::now();
        let uow = UnitOfWork::new()
            .reserve(StockReservation::hold(tx_id, StockKey::new("WH-1", "SKU-2"), 1, later(), now))
            .reserve(StockReservation::hold(tx_id, key(), 2, later(), now))
            .reserve(StockReservation::hold(tx_id, key(), 2, later(), now));

        let result = store.commit(uow).await;
        assert!(matches!(result, Err(StoreError::InsufficientStock { requested: 4, .. })));

        let other = store
            .stock_level(&StockKey::new("WH-1", "SKU-2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.reserved, 0);
        assert!(store.reservations_for_transaction(tx_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let store = InMemoryStore::new();
        let mut tx = transaction("key-1");

        let version = store
            .commit(UnitOfWork::new().insert_transaction(tx.clone()))
            .await
            .unwrap();
        assert_eq!(version, Some(Version::first()));
        tx.set_version(Version::first());

        tx.mark_stock_reserved(Utc::now()).unwrap();
        let version = store
            .commit(UnitOfWork::new().update_transaction(tx.clone()))
            .await
            .unwrap();
        assert_eq!(version, Some(Version::new(2)));

        // Writing from the stale copy again must fail.
        let result = store
            .commit(UnitOfWork::new().update_transaction(tx.clone()))
            .await;
        assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key() {
        let store = InMemoryStore::new();
        store
            .commit(UnitOfWork::new().insert_transaction(transaction("same")))
            .await
            .unwrap();

        let result = store
            .commit(UnitOfWork::new().insert_transaction(transaction("same")))
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateIdempotencyKey(_))));
    }

    #[tokio::test]
    async fn test_duplicate_callback_rolls_back_unit() {
        let store = stocked(5).await;
        let tx_id = TransactionId::new();
        let callback = PaymentCallback::new(
            CallbackId::new("cb-1"),
            tx_id,
            PaymentOutcome::Paid,
            Utc::now(),
        );
        store
            .commit(UnitOfWork::new().record_callback(callback.clone()))
            .await
            .unwrap();

        let reservation = StockReservation::hold(tx_id, key(), 1, later(), Utc::now());
        let result = store
            .commit(
                UnitOfWork::new()
                    .reserve(reservation.clone())
                    .record_callback(callback),
            )
            .await;

        assert!(matches!(result, Err(StoreError::DuplicateCallback(_))));
        assert!(store.get_reservation(reservation.id).await.unwrap().is_none());
        let level = store.stock_level(&key()).await.unwrap().unwrap();
        assert_eq!(level.reserved, 0);
    }

    #[tokio::test]
    async fn test_outbox_sequence_and_publish() {
        let store = InMemoryStore::new();
        let mut tx = transaction("key-1");
        tx.mark_stock_reserved(Utc::now()).unwrap();
        let event = tx
            .cancel(domain::CancellationReason::Expired, Utc::now())
            .unwrap();
        let row = OutboxEvent::from_transaction_event(&event, Utc::now()).unwrap();

        store
            .commit(
                UnitOfWork::new()
                    .insert_transaction(tx.clone())
                    .enqueue(row.clone())
                    .enqueue(OutboxEvent::from_transaction_event(&event, Utc::now()).unwrap()),
            )
            .await
            .unwrap();

        let pending = store.fetch_unpublished(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].sequence, 1);
        assert_eq!(pending[1].sequence, 2);

        store.mark_published(row.id, Utc::now()).await.unwrap();
        assert_eq!(store.unpublished_count().await.unwrap(), 1);
        assert_eq!(
            store
                .events_for_aggregate(tx.id().as_uuid())
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_expired_reservations_only_held() {
        let store = stocked(5).await;
        let past = Utc::now() - Duration::seconds(1);
        let expired = store
            .reserve(key(), 1, TransactionId::new(), past)
            .await
            .unwrap();
        let settled = store
            .reserve(key(), 1, TransactionId::new(), past)
            .await
            .unwrap();
        store
            .reserve(key(), 1, TransactionId::new(), later())
            .await
            .unwrap();
        store.release(settled.id).await.unwrap();

        let found = store.expired_reservations(Utc::now(), 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired.id);
    }

    #[tokio::test]
    async fn test_find_by_gateway_reference() {
        let store = InMemoryStore::new();
        let mut tx = transaction("key-1");
        tx.mark_stock_reserved(Utc::now()).unwrap();
        tx.await_payment(GatewayReference::new("PAY-9"), Utc::now())
            .unwrap();
        store
            .commit(UnitOfWork::new().insert_transaction(tx.clone()))
            .await
            .unwrap();

        let found = store
            .find_by_gateway_reference(&GatewayReference::new("PAY-9"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), tx.id());
        assert_eq!(found.version(), Version::first());
    }

    #[test]
    fn test_rejected_unit_is_not_counted_as_reserved() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let store = stocked(5).await;
                let first = transaction("same");
                let second = transaction("same");
                let now = Utc::now();

                store
                    .commit(
                        UnitOfWork::new()
                            .insert_transaction(first.clone())
                            .reserve(StockReservation::hold(first.id(), key(), 1, later(), now)),
                    )
                    .await
                    .unwrap();
                let result = store
                    .commit(
                        UnitOfWork::new()
                            .insert_transaction(second.clone())
                            .reserve(StockReservation::hold(second.id(), key(), 2, later(), now)),
                    )
                    .await;

                assert!(matches!(result, Err(StoreError::DuplicateIdempotencyKey(_))));
                let level = store.stock_level(&key()).await.unwrap().unwrap();
                assert_eq!(level.reserved, 1);
            })
        });

        let rendered = handle.render();
        assert!(
            rendered.contains(r#"ledger_reservations_total{result="reserved"} 1"#),
            "{rendered}"
        );
    }

    #[tokio::test]
    async fn test_pending_callback_is_cleared_when_recorded() {
        let store = InMemoryStore::new();
        let reference = GatewayReference::new("PAY-7");
        let received = Utc::now();
        store
            .save_pending_callback(PendingCallback::new(
                CallbackId::new("cb-2"),
                reference.clone(),
                PaymentOutcome::Failed,
                received + Duration::seconds(1),
            ))
            .await
            .unwrap();
        store
            .save_pending_callback(PendingCallback::new(
                CallbackId::new("cb-1"),
                reference.clone(),
                PaymentOutcome::Paid,
                received,
            ))
            .await
            .unwrap();
        // Redelivery keeps the first copy.
        store
            .save_pending_callback(PendingCallback::new(
                CallbackId::new("cb-1"),
                reference.clone(),
                PaymentOutcome::Failed,
                received,
            ))
            .await
            .unwrap();

        let pending = store.pending_callbacks_for(&reference).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].callback_id, CallbackId::new("cb-1"));
        assert_eq!(pending[0].outcome, PaymentOutcome::Paid);
        assert!(
            store
                .pending_callbacks_for(&GatewayReference::new("PAY-8"))
                .await
                .unwrap()
                .is_empty()
        );

        let callback = PaymentCallback::new(
            CallbackId::new("cb-1"),
            TransactionId::new(),
            PaymentOutcome::Paid,
            Utc::now(),
        );
        store
            .commit(UnitOfWork::new().record_callback(callback))
            .await
            .unwrap();

        let remaining = store.pending_callbacks_for(&reference).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].callback_id, CallbackId::new("cb-2"));

        // A recorded callback is never parked again.
        store
            .save_pending_callback(PendingCallback::new(
                CallbackId::new("cb-1"),
                reference.clone(),
                PaymentOutcome::Paid,
                received,
            ))
            .await
            .unwrap();
        assert_eq!(store.pending_callbacks_for(&reference).await.unwrap().len(), 1);

        // Nothing is resolvable until a transaction carries the reference.
        assert!(store.resolvable_pending_callbacks(10).await.unwrap().is_empty());
        let mut tx = transaction("key-1");
        tx.mark_stock_reserved(Utc::now()).unwrap();
        tx.await_payment(reference.clone(), Utc::now()).unwrap();
        store
            .commit(UnitOfWork::new().insert_transaction(tx))
            .await
            .unwrap();
        let resolvable = store.resolvable_pending_callbacks(10).await.unwrap();
        assert_eq!(resolvable.len(), 1);
        assert_eq!(resolvable[0].callback_id, CallbackId::new("cb-2"));

        store
            .discard_pending_callback(&CallbackId::new("cb-2"))
            .await
            .unwrap();
        assert!(store.pending_callbacks_for(&reference).await.unwrap().is_empty());
    }
}
