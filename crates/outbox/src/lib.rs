//! Delivery side of the transactional outbox.
//!
//! - [`MessageBroker`] trait for the downstream transport
//! - [`InMemoryBroker`] for tests, [`LogBroker`] for the standalone server
//! - [`OutboxPublisher`] for draining committed events in sequence order

pub mod broker;
pub mod error;
pub mod publisher;

pub use broker::{BrokerMessage, InMemoryBroker, LogBroker, MessageBroker};
pub use error::{BrokerError, PublishError, Result};
pub use publisher::{OutboxPublisher, PublishReport, PublisherConfig};
