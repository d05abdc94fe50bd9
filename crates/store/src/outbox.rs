use chrono::{DateTime, Utc};
use common::EventId;
use domain::{DomainEvent, TransactionEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row of the transactional outbox.
///
/// Written in the same unit of work as the state change it describes and
/// drained by the publisher in `sequence` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Store-assigned, monotonically increasing position. Zero until stored.
    pub sequence: i64,

    /// The type of aggregate (e.g., "Transaction").
    pub aggregate_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: Uuid,

    /// The type of the event (e.g., "transaction.completed").
    pub event_type: String,

    /// Key consumers deduplicate on.
    pub dedup_key: String,

    /// The serialized event.
    pub payload: serde_json::Value,

    /// When the event was enqueued.
    pub created_at: DateTime<Utc>,

    /// When the broker acknowledged the event. `None` while pending.
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Builds an unsequenced outbox row from a transaction event.
    pub fn from_transaction_event(
        event: &TransactionEvent,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: EventId::new(),
            sequence: 0,
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.transaction_id().as_uuid(),
            event_type: event.event_type().to_string(),
            dedup_key: event.dedup_key(),
            payload: serde_json::to_value(event)?,
            created_at: now,
            published_at: None,
        })
    }

    /// Deserializes the payload back into a transaction event.
    pub fn transaction_event(&self) -> Result<TransactionEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}
