//! Transaction aggregate implementation.

use chrono::{DateTime, Utc};
use common::{GatewayReference, IdempotencyKey, Money, TransactionId, Version};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::events::{
    EventOutcome, TransactionCancelledData, TransactionCompletedData, TransactionEvent,
};

use super::{CancellationReason, LineItem, TransactionStatus};

/// Transaction aggregate root.
///
/// Owns the order's line items and walks them through reservation, payment and
/// settlement. Transition methods mutate in place and are only called by the
/// orchestrator, which persists the result together with the matching
/// reservation and outbox writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    idempotency_key: IdempotencyKey,
    line_items: Vec<LineItem>,
    status: TransactionStatus,
    cancellation_reason: Option<CancellationReason>,
    total_amount: Money,
    gateway_reference: Option<GatewayReference>,
    /// Instant after which an unpaid transaction may be expired.
    payment_deadline: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Stored version; `Version::initial()` until first persisted.
    #[serde(default)]
    version: Version,
}

/// Plain field-by-field form of a [`Transaction`], used by storage backends.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub idempotency_key: IdempotencyKey,
    pub line_items: Vec<LineItem>,
    pub status: TransactionStatus,
    pub cancellation_reason: Option<CancellationReason>,
    pub total_amount: Money,
    pub gateway_reference: Option<GatewayReference>,
    pub payment_deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: Version,
}

impl From<TransactionRecord> for Transaction {
    fn from(record: TransactionRecord) -> Self {
        Self {
            id: record.id,
            idempotency_key: record.idempotency_key,
            line_items: record.line_items,
            status: record.status,
            cancellation_reason: record.cancellation_reason,
            total_amount: record.total_amount,
            gateway_reference: record.gateway_reference,
            payment_deadline: record.payment_deadline,
            created_at: record.created_at,
            updated_at: record.updated_at,
            version: record.version,
        }
    }
}

impl From<Transaction> for TransactionRecord {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            idempotency_key: tx.idempotency_key,
            line_items: tx.line_items,
            status: tx.status,
            cancellation_reason: tx.cancellation_reason,
            total_amount: tx.total_amount,
            gateway_reference: tx.gateway_reference,
            payment_deadline: tx.payment_deadline,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            version: tx.version,
        }
    }
}

impl Transaction {
    /// Aggregate type name used in outbox rows.
    pub const AGGREGATE_TYPE: &'static str = "Transaction";

    /// Creates a new transaction in `Created`.
    ///
    /// Rejects an empty or blank idempotency key, an empty item list, any
    /// item with an out-of-range quantity or a non-positive price, and a total
    /// that does not fit in an `i64` of cents.
    pub fn create(
        id: TransactionId,
        idempotency_key: IdempotencyKey,
        line_items: Vec<LineItem>,
        payment_deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if idempotency_key.is_blank() {
            return Err(DomainError::BlankIdentifier {
                field: "idempotencyKey",
            });
        }
        if line_items.is_empty() {
            return Err(DomainError::NoLineItems);
        }
        for item in &line_items {
            item.validate()?;
        }

        let total_amount = line_items
            .iter()
            .try_fold(Money::zero(), |total, item| {
                item.total_price().and_then(|price| total.checked_add(price))
            })
            .ok_or(DomainError::AmountOverflow)?;

        Ok(Self {
            id,
            idempotency_key,
            line_items,
            status: TransactionStatus::Created,
            cancellation_reason: None,
            total_amount,
            gateway_reference: None,
            payment_deadline,
            created_at: now,
            updated_at: now,
            version: Version::initial(),
        })
    }
}

// Query methods
impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn cancellation_reason(&self) -> Option<CancellationReason> {
        self.cancellation_reason
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn gateway_reference(&self) -> Option<&GatewayReference> {
        self.gateway_reference.as_ref()
    }

    pub fn payment_deadline(&self) -> DateTime<Utc> {
        self.payment_deadline
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the stored version this instance was loaded at.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Sets the stored version. Called by storage after a successful write.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Returns true if the transaction is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the payment deadline has passed at `now` and the
    /// transaction is still waiting on stock or payment.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.can_cancel(CancellationReason::Expired) && now >= self.payment_deadline
    }
}

// Transition methods
impl Transaction {
    /// `Created` → `StockReserved`.
    pub fn mark_stock_reserved(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure(self.status.can_mark_reserved(), "mark stock reserved")?;
        self.status = TransactionStatus::StockReserved;
        self.updated_at = now;
        Ok(())
    }

    /// `StockReserved` → `AwaitingPayment`, recording the gateway reference.
    pub fn await_payment(
        &mut self,
        reference: GatewayReference,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure(self.status.can_await_payment(), "await payment")?;
        if self.gateway_reference.is_some() {
            return Err(DomainError::GatewayReferenceAlreadySet);
        }
        self.gateway_reference = Some(reference);
        self.status = TransactionStatus::AwaitingPayment;
        self.updated_at = now;
        Ok(())
    }

    /// `AwaitingPayment` → `Paid`.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure(self.status.accepts_payment_outcome(), "mark paid")?;
        self.status = TransactionStatus::Paid;
        self.updated_at = now;
        Ok(())
    }

    /// `Paid` → `Completed`. Returns the event to enqueue.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<TransactionEvent, DomainError> {
        self.ensure(self.status.can_complete(), "complete")?;
        self.status = TransactionStatus::Completed;
        self.updated_at = now;

        Ok(TransactionEvent::Completed(TransactionCompletedData {
            transaction_id: self.id,
            line_items: self.line_items.clone(),
            outcome: EventOutcome::Completed,
            total: self.total_amount,
            gateway_reference: self.gateway_reference.clone(),
            completed_at: now,
        }))
    }

    /// Any eligible state → `Cancelled`. Returns the event to enqueue.
    pub fn cancel(
        &mut self,
        reason: CancellationReason,
        now: DateTime<Utc>,
    ) -> Result<TransactionEvent, DomainError> {
        self.ensure(self.status.can_cancel(reason), "cancel")?;
        self.status = TransactionStatus::Cancelled;
        self.cancellation_reason = Some(reason);
        self.updated_at = now;

        Ok(TransactionEvent::Cancelled(TransactionCancelledData {
            transaction_id: self.id,
            line_items: self.line_items.clone(),
            outcome: EventOutcome::Cancelled,
            reason,
            cancelled_at: now,
        }))
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), DomainError> {
        if allowed {
            Ok(())
        } else {
            Err(DomainError::InvalidStateTransition {
                current_state: self.status,
                action,
            })
        }
    }
}
