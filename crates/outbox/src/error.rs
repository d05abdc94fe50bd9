//! Outbox error types.

use thiserror::Error;

/// Errors returned by a message broker.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker could not be reached or timed out.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Errors that stop a publishing pass.
#[derive(Debug, Error)]
pub enum PublishError {
    /// An error occurred reading or acknowledging outbox rows.
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),
}

/// Result type for publisher operations.
pub type Result<T> = std::result::Result<T, PublishError>;
