use std::collections::BTreeMap;

use common::ReservationId;
use domain::{PaymentCallback, ReservationStatus, StockKey, StockReservation, Transaction};

use crate::OutboxEvent;

/// How the transaction row is written.
#[derive(Debug, Clone)]
pub enum TransactionWrite {
    /// Insert a new row at `Version::first()`. Fails on a duplicate idempotency key.
    Insert(Transaction),

    /// Overwrite the row, expecting it to still be at `transaction.version()`.
    Update(Transaction),
}

impl TransactionWrite {
    pub fn transaction(&self) -> &Transaction {
        match self {
            TransactionWrite::Insert(tx) | TransactionWrite::Update(tx) => tx,
        }
    }
}

/// A terminal status to apply to a held reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub reservation_id: ReservationId,
    pub status: ReservationStatus,
}

/// A set of writes applied atomically by [`crate::TransactionStore::commit`].
///
/// Either every write lands or none does. New reservations are checked against
/// available stock per (warehouse, product) pair using their combined quantity.
/// Settling a reservation that is already terminal is a no-op.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    transaction: Option<TransactionWrite>,
    reservations: Vec<StockReservation>,
    settlements: Vec<Settlement>,
    outbox: Vec<OutboxEvent>,
    callback: Option<PaymentCallback>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new transaction.
    pub fn insert_transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = Some(TransactionWrite::Insert(transaction));
        self
    }

    /// Updates an existing transaction under a version check.
    pub fn update_transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = Some(TransactionWrite::Update(transaction));
        self
    }

    /// Holds stock for a new reservation.
    pub fn reserve(mut self, reservation: StockReservation) -> Self {
        self.reservations.push(reservation);
        self
    }

    /// Moves a held reservation to `Committed`.
    pub fn commit_reservation(mut self, reservation_id: ReservationId) -> Self {
        self.settlements.push(Settlement {
            reservation_id,
            status: ReservationStatus::Committed,
        });
        self
    }

    /// Moves a held reservation to `Released`.
    pub fn release_reservation(mut self, reservation_id: ReservationId) -> Self {
        self.settlements.push(Settlement {
            reservation_id,
            status: ReservationStatus::Released,
        });
        self
    }

    /// Appends an event to the outbox.
    pub fn enqueue(mut self, event: OutboxEvent) -> Self {
        self.outbox.push(event);
        self
    }

    /// Records a processed payment callback.
    pub fn record_callback(mut self, callback: PaymentCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn transaction(&self) -> Option<&TransactionWrite> {
        self.transaction.as_ref()
    }

    pub fn reservations(&self) -> &[StockReservation] {
        &self.reservations
    }

    pub fn settlements(&self) -> &[Settlement] {
        &self.settlements
    }

    pub fn outbox(&self) -> &[OutboxEvent] {
        &self.outbox
    }

    pub fn callback(&self) -> Option<&PaymentCallback> {
        self.callback.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.transaction.is_none()
            && self.reservations.is_empty()
            && self.settlements.is_empty()
            && self.outbox.is_empty()
            && self.callback.is_none()
    }

    /// Combined quantity requested per pair, in key order.
    pub fn demand(&self) -> BTreeMap<StockKey, u64> {
        let mut demand = BTreeMap::new();
        for reservation in &self.reservations {
            *demand.entry(reservation.key()).or_insert(0) += u64::from(reservation.quantity);
        }
        demand
    }

    pub(crate) fn into_parts(self) -> UnitOfWorkParts {
        UnitOfWorkParts {
            transaction: self.transaction,
            reservations: self.reservations,
            settlements: self.settlements,
            outbox: self.outbox,
            callback: self.callback,
        }
    }
}

pub(crate) struct UnitOfWorkParts {
    pub transaction: Option<TransactionWrite>,
    pub reservations: Vec<StockReservation>,
    pub settlements: Vec<Settlement>,
    pub outbox: Vec<OutboxEvent>,
    pub callback: Option<PaymentCallback>,
}
