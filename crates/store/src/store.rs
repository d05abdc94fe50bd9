use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CallbackId, EventId, GatewayReference, IdempotencyKey, ReservationId, TransactionId, Version,
};
use domain::{
    PaymentCallback, PendingCallback, StockKey, StockLevel, StockReservation, Transaction,
};
use uuid::Uuid;

use crate::{OutboxEvent, Result, StoreError, UnitOfWork};

/// Per-(warehouse, product) stock counters and the reservations held against them.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Adds physically received units to a pair, creating it if needed.
    async fn receive_stock(&self, key: &StockKey, quantity: u64) -> Result<StockLevel>;

    /// Reads the counter for a pair. Returns None if the pair was never stocked.
    async fn stock_level(&self, key: &StockKey) -> Result<Option<StockLevel>>;

    /// Retrieves a reservation by id.
    async fn get_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>>;

    /// Retrieves every reservation owned by a transaction, oldest first.
    async fn reservations_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<StockReservation>>;

    /// Retrieves up to `limit` HELD reservations whose expiry is at or before `now`.
    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StockReservation>>;
}

/// Read and acknowledgment side of the transactional outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Retrieves up to `limit` unpublished events in sequence order.
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Marks an event as acknowledged by the broker. Idempotent.
    async fn mark_published(&self, id: EventId, published_at: DateTime<Utc>) -> Result<()>;

    /// Retrieves every event for an aggregate in sequence order.
    async fn events_for_aggregate(&self, aggregate_id: Uuid) -> Result<Vec<OutboxEvent>>;

    /// Number of events still waiting for delivery.
    async fn unpublished_count(&self) -> Result<u64>;
}

/// The full saga store: transactions, ledger, outbox, and callback records.
///
/// Every write goes through [`TransactionStore::commit`], which applies a
/// [`UnitOfWork`] atomically.
#[async_trait]
pub trait TransactionStore: StockLedger + OutboxStore {
    /// Applies every write in the unit of work, or none of them.
    ///
    /// Returns the new version of the written transaction, if the unit wrote one.
    async fn commit(&self, uow: UnitOfWork) -> Result<Option<Version>>;

    /// Retrieves a transaction by id.
    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Retrieves the transaction created under an idempotency key.
    async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<Transaction>>;

    /// Retrieves the transaction a payment intent was issued for.
    async fn find_by_gateway_reference(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<Transaction>>;

    /// Retrieves a recorded payment callback.
    async fn find_callback(&self, id: &CallbackId) -> Result<Option<PaymentCallback>>;

    /// Holds a callback whose gateway reference is not attached yet.
    ///
    /// No-op if the callback id is already pending or recorded. Committing a
    /// unit that records the same callback id removes it.
    async fn save_pending_callback(&self, callback: PendingCallback) -> Result<()>;

    /// Pending callbacks for one gateway reference, oldest first.
    async fn pending_callbacks_for(
        &self,
        reference: &GatewayReference,
    ) -> Result<Vec<PendingCallback>>;

    /// Up to `limit` pending callbacks whose gateway reference is now attached
    /// to a transaction, oldest first.
    async fn resolvable_pending_callbacks(&self, limit: usize) -> Result<Vec<PendingCallback>>;

    /// Drops a pending callback. Idempotent.
    async fn discard_pending_callback(&self, id: &CallbackId) -> Result<()>;
}

/// Single-reservation ledger operations built on [`TransactionStore::commit`].
#[async_trait]
pub trait StockLedgerExt: TransactionStore {
    /// Holds `quantity` units of a pair for a transaction, or fails with
    /// `InsufficientStock` without holding anything.
    async fn reserve(
        &self,
        key: StockKey,
        quantity: u32,
        transaction_id: TransactionId,
        expires_at: DateTime<Utc>,
    ) -> Result<StockReservation> {
        let reservation =
            StockReservation::hold(transaction_id, key, quantity, expires_at, Utc::now());
        self.commit(UnitOfWork::new().reserve(reservation.clone()))
            .await?;
        Ok(reservation)
    }

    /// Returns a held reservation's units to available. No-op if already terminal.
    async fn release(&self, id: ReservationId) -> Result<()> {
        self.commit(UnitOfWork::new().release_reservation(id))
            .await?;
        Ok(())
    }

    /// Converts a held reservation into sold units. No-op if already terminal.
    async fn commit_reservation(&self, id: ReservationId) -> Result<()> {
        self.commit(UnitOfWork::new().commit_reservation(id))
            .await?;
        Ok(())
    }

    /// Checks whether a pair has at least `quantity` units available right now.
    async fn has_available(&self, key: &StockKey, quantity: u64) -> Result<bool> {
        Ok(self
            .stock_level(key)
            .await?
            .is_some_and(|level| level.available() >= quantity))
    }
}

// Blanket implementation for all TransactionStore implementations
impl<T: TransactionStore + ?Sized> StockLedgerExt for T {}

/// Records the outcome of a unit of work's reservation step.
pub(crate) fn record_reservation_outcome(
    uow_reservations: usize,
    result: &std::result::Result<(), &StoreError>,
) {
    if uow_reservations == 0 {
        return;
    }
    match result {
        Ok(()) => {
            metrics::counter!("ledger_reservations_total", "result" => "reserved")
                .increment(uow_reservations as u64);
        }
        Err(StoreError::InsufficientStock { .. }) => {
            metrics::counter!("ledger_reservations_total", "result" => "insufficient_stock")
                .increment(1);
        }
        Err(_) => {}
    }
}
