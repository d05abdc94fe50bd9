//! Message broker trait and in-memory implementation.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::EventId;
use serde::{Deserialize, Serialize};
use store::OutboxEvent;
use uuid::Uuid;

use crate::error::BrokerError;

/// A message as handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerMessage {
    pub event_id: EventId,
    pub event_type: String,
    /// Partition key: the aggregate id, so one transaction's events stay ordered.
    pub key: Uuid,
    /// `transactionId:eventType`; consumers drop repeats of the same key.
    pub dedup_key: String,
    pub payload: serde_json::Value,
}

impl From<&OutboxEvent> for BrokerMessage {
    fn from(event: &OutboxEvent) -> Self {
        Self {
            event_id: event.id,
            event_type: event.event_type.clone(),
            key: event.aggregate_id,
            dedup_key: event.dedup_key.clone(),
            payload: event.payload.clone(),
        }
    }
}

/// Downstream transport for outbox events.
///
/// `publish` returns only after the broker acknowledged the message.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError>;
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    delivered: Vec<BrokerMessage>,
    fail_all: bool,
    fail_next: usize,
    fail_keys: Vec<Uuid>,
    attempts: usize,
}

/// In-memory broker that records every acknowledged message.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<InMemoryBrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new in-memory broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the broker to reject every publish.
    pub fn set_fail_all(&self, fail: bool) {
        self.state.write().unwrap().fail_all = fail;
    }

    /// Rejects the next `count` publishes.
    pub fn fail_next(&self, count: usize) {
        self.state.write().unwrap().fail_next = count;
    }

    /// Rejects every message partitioned under `key`.
    pub fn fail_key(&self, key: Uuid) {
        self.state.write().unwrap().fail_keys.push(key);
    }

    /// Stops rejecting messages for any key.
    pub fn clear_failures(&self) {
        let mut state = self.state.write().unwrap();
        state.fail_all = false;
        state.fail_next = 0;
        state.fail_keys.clear();
    }

    /// Returns every acknowledged message in delivery order.
    pub fn delivered(&self) -> Vec<BrokerMessage> {
        self.state.read().unwrap().delivered.clone()
    }

    /// Returns the number of acknowledged messages.
    pub fn delivered_count(&self) -> usize {
        self.state.read().unwrap().delivered.len()
    }

    /// Returns the number of publish calls, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.state.read().unwrap().attempts
    }

    /// Returns the delivered messages with duplicates collapsed by dedup key,
    /// as a consumer would see them.
    pub fn deduplicated(&self) -> Vec<BrokerMessage> {
        let state = self.state.read().unwrap();
        let mut seen = HashSet::new();
        state
            .delivered
            .iter()
            .filter(|message| seen.insert(message.dedup_key.as_str()))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let mut state = self.state.write().unwrap();
        state.attempts += 1;

        if state.fail_all {
            return Err(BrokerError::Unavailable("broker offline".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BrokerError::Unavailable("transient failure".to_string()));
        }
        if state.fail_keys.contains(&message.key) {
            return Err(BrokerError::Rejected(format!(
                "partition {} unavailable",
                message.key
            )));
        }

        tracing::debug!(
            event_type = %message.event_type,
            dedup_key = %message.dedup_key,
            "message delivered"
        );
        state.delivered.push(message.clone());
        Ok(())
    }
}

/// Broker that writes each message to the log and acknowledges it.
///
/// Used by the server when no external transport is configured; keeps nothing
/// in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroker;

#[async_trait]
impl MessageBroker for LogBroker {
    async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        tracing::info!(
            event_id = %message.event_id,
            event_type = %message.event_type,
            key = %message.key,
            dedup_key = %message.dedup_key,
            payload = %message.payload,
            "event published to log"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(key: Uuid, event_type: &str) -> BrokerMessage {
        BrokerMessage {
            event_id: EventId::new(),
            event_type: event_type.to_string(),
            key,
            dedup_key: format!("{key}:{event_type}"),
            payload: serde_json::json!({"test": true}),
        }
    }

    #[tokio::test]
    async fn test_publish_records_message() {
        let broker = InMemoryBroker::new();
        broker
            .publish(&message(Uuid::new_v4(), "transaction.completed"))
            .await
            .unwrap();

        assert_eq!(broker.delivered_count(), 1);
        assert_eq!(broker.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let broker = InMemoryBroker::new();
        broker.fail_next(2);
        let msg = message(Uuid::new_v4(), "transaction.completed");

        assert!(broker.publish(&msg).await.is_err());
        assert!(broker.publish(&msg).await.is_err());
        assert!(broker.publish(&msg).await.is_ok());
        assert_eq!(broker.attempt_count(), 3);
        assert_eq!(broker.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_key_only_affects_that_partition() {
        let broker = InMemoryBroker::new();
        let bad = Uuid::new_v4();
        broker.fail_key(bad);

        assert!(matches!(
            broker.publish(&message(bad, "transaction.cancelled")).await,
            Err(BrokerError::Rejected(_))
        ));
        assert!(
            broker
                .publish(&message(Uuid::new_v4(), "transaction.cancelled"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_log_broker_acknowledges() {
        let result = LogBroker
            .publish(&message(Uuid::new_v4(), "transaction.completed"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_deduplicated_view() {
        let broker = InMemoryBroker::new();
        let msg = message(Uuid::new_v4(), "transaction.completed");
        broker.publish(&msg).await.unwrap();
        broker.publish(&msg).await.unwrap();

        assert_eq!(broker.delivered_count(), 2);
        assert_eq!(broker.deduplicated().len(), 1);
    }
}
