//! Domain events published through the outbox.

use chrono::{DateTime, Utc};
use common::{GatewayReference, Money, TransactionId};
use serde::{Deserialize, Serialize};

use crate::transaction::{CancellationReason, LineItem};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + Send + Sync + Clone {
    /// Returns the event type name used for routing and consumer dedup.
    fn event_type(&self) -> &'static str;

    /// Returns the aggregate type the event belongs to.
    fn aggregate_type(&self) -> &'static str;
}

/// Events emitted when a transaction reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    /// Payment confirmed and stock committed.
    #[serde(rename = "transaction.completed")]
    Completed(TransactionCompletedData),

    /// Reservations released; the transaction will not be fulfilled.
    #[serde(rename = "transaction.cancelled")]
    Cancelled(TransactionCancelledData),
}

/// Final outcome reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    Completed,
    Cancelled,
}

impl DomainEvent for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::Completed(_) => TransactionEvent::COMPLETED,
            TransactionEvent::Cancelled(_) => TransactionEvent::CANCELLED,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "Transaction"
    }
}

/// Data for the `transaction.completed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCompletedData {
    pub transaction_id: TransactionId,
    pub line_items: Vec<LineItem>,
    pub outcome: EventOutcome,
    #[serde(rename = "totalCents")]
    pub total: Money,
    pub gateway_reference: Option<GatewayReference>,
    pub completed_at: DateTime<Utc>,
}

/// Data for the `transaction.cancelled` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCancelledData {
    pub transaction_id: TransactionId,
    pub line_items: Vec<LineItem>,
    pub outcome: EventOutcome,
    pub reason: CancellationReason,
    pub cancelled_at: DateTime<Utc>,
}

impl TransactionEvent {
    /// Event type of [`TransactionEvent::Completed`].
    pub const COMPLETED: &'static str = "transaction.completed";

    /// Event type of [`TransactionEvent::Cancelled`].
    pub const CANCELLED: &'static str = "transaction.cancelled";

    /// Returns the transaction the event describes.
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            TransactionEvent::Completed(data) => data.transaction_id,
            TransactionEvent::Cancelled(data) => data.transaction_id,
        }
    }

    /// Key consumers deduplicate on: `transactionId:eventType`.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.transaction_id(), self.event_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled() -> TransactionEvent {
        TransactionEvent::Cancelled(TransactionCancelledData {
            transaction_id: TransactionId::new(),
            line_items: vec![LineItem::new("SKU-1", "WH-1", 1, Money::from_cents(500))],
            outcome: EventOutcome::Cancelled,
            reason: CancellationReason::Expired,
            cancelled_at: Utc::now(),
        })
    }

    #[test]
    fn test_event_type() {
        let event = cancelled();
        assert_eq!(event.event_type(), "transaction.cancelled");
        assert_eq!(event.aggregate_type(), "Transaction");
    }

    #[test]
    fn test_tagged_wire_format() {
        let event = cancelled();
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "transaction.cancelled");
        assert_eq!(json["data"]["reason"], "EXPIRED");
        assert_eq!(json["data"]["outcome"], "CANCELLED");
        assert_eq!(json["data"]["lineItems"][0]["productId"], "SKU-1");

        let decoded: TransactionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_dedup_key_combines_id_and_type() {
        let event = cancelled();
        assert_eq!(
            event.dedup_key(),
            format!("{}:transaction.cancelled", event.transaction_id())
        );
    }
}
