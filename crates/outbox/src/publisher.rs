//! Outbox publisher loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::RetryPolicy;
use store::OutboxStore;
use tokio::sync::watch;
use uuid::Uuid;

use crate::Result;
use crate::broker::{BrokerMessage, MessageBroker};

/// Tuning for the publisher loop.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Maximum events fetched per pass.
    pub batch_size: usize,
    /// Wait between passes when the outbox is drained.
    pub poll_interval: Duration,
    /// Backoff between passes that hit a delivery or store failure.
    pub backoff: RetryPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            backoff: RetryPolicy::unbounded(Duration::from_millis(100), Duration::from_secs(30)),
        }
    }
}

/// Counts from a single publishing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Events acknowledged by the broker and marked published.
    pub delivered: usize,
    /// Events the broker refused.
    pub failed: usize,
    /// Events skipped because an earlier event of the same aggregate failed.
    pub blocked: usize,
}

impl PublishReport {
    /// True if every fetched event went out.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.blocked == 0
    }

    pub fn attempted(&self) -> usize {
        self.delivered + self.failed + self.blocked
    }
}

/// Drains unpublished outbox events to a broker, in sequence order.
///
/// An event is marked published only after the broker acknowledges it, so a
/// crash between the two repeats the delivery (at-least-once). When delivery
/// fails for an aggregate, that aggregate's later events wait for the next pass
/// while other aggregates proceed.
pub struct OutboxPublisher<S: OutboxStore, B: MessageBroker> {
    store: Arc<S>,
    broker: Arc<B>,
    config: PublisherConfig,
}

impl<S: OutboxStore, B: MessageBroker> OutboxPublisher<S, B> {
    /// Creates a new publisher.
    pub fn new(store: Arc<S>, broker: Arc<B>, config: PublisherConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Runs a single pass over up to `batch_size` pending events.
    #[tracing::instrument(skip(self))]
    pub async fn publish_once(&self) -> Result<PublishReport> {
        let events = self.store.fetch_unpublished(self.config.batch_size).await?;
        let mut report = PublishReport::default();
        let mut blocked: HashSet<Uuid> = HashSet::new();

        for event in &events {
            if blocked.contains(&event.aggregate_id) {
                report.blocked += 1;
                continue;
            }

            let message = BrokerMessage::from(event);
            match self.broker.publish(&message).await {
                Ok(()) => {
                    self.store.mark_published(event.id, Utc::now()).await?;
                    report.delivered += 1;
                    metrics::counter!("outbox_events_published_total").increment(1);
                    tracing::debug!(
                        sequence = event.sequence,
                        event_type = %event.event_type,
                        "event published"
                    );
                }
                Err(err) => {
                    blocked.insert(event.aggregate_id);
                    report.failed += 1;
                    metrics::counter!("outbox_delivery_failures_total").increment(1);
                    tracing::warn!(
                        sequence = event.sequence,
                        aggregate_id = %event.aggregate_id,
                        error = %err,
                        "event delivery failed"
                    );
                }
            }
        }

        if report.attempted() > 0 {
            tracing::info!(
                delivered = report.delivered,
                failed = report.failed,
                blocked = report.blocked,
                "publish pass complete"
            );
        }

        Ok(report)
    }

    /// Runs passes until `shutdown` flips to true.
    ///
    /// A full clean batch is followed immediately by another pass; a partial one
    /// waits `poll_interval`. Failed passes back off exponentially and retry forever.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "outbox publisher started"
        );
        let mut consecutive_failures = 0usize;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.publish_once().await {
                Ok(report) if report.is_clean() => {
                    consecutive_failures = 0;
                    if report.delivered >= self.config.batch_size {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval
                    }
                }
                Ok(_) => {
                    let delay = self.config.backoff.delay_for_attempt(consecutive_failures);
                    consecutive_failures += 1;
                    delay
                }
                Err(err) => {
                    tracing::error!(error = %err, "publish pass failed");
                    let delay = self.config.backoff.delay_for_attempt(consecutive_failures);
                    consecutive_failures += 1;
                    delay
                }
            };

            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!("outbox publisher stopped");
    }
}
