//! Saga error types.

use common::{ProductId, TransactionId, WarehouseId};
use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors raised by a payment gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway could not be reached or answered with a server error.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway refused the payment intent.
    #[error("Payment intent rejected: {0}")]
    Rejected(String),

    /// The gateway answered with a body we could not read.
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// True if the same request may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Unavailable(_) => true,
            GatewayError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            GatewayError::Rejected(_) | GatewayError::InvalidResponse(_) => false,
        }
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A line item could not be reserved; the transaction was persisted as cancelled.
    #[error(
        "Insufficient stock for {product_id} at {warehouse_id}: requested {requested}, available {available} (transaction {transaction_id} cancelled)"
    )]
    InsufficientStock {
        transaction_id: TransactionId,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        requested: u64,
        available: u64,
    },

    /// No payment intent could be obtained; the transaction was cancelled.
    #[error("Payment gateway unavailable for transaction {transaction_id}: {reason}")]
    GatewayUnavailable {
        transaction_id: TransactionId,
        reason: String,
    },

    /// The request was malformed and nothing was persisted.
    #[error("Invalid request: {0}")]
    InvalidRequest(DomainError),

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// True for failures of the storage layer; the caller may retry the request.
    pub fn is_storage_failure(&self) -> bool {
        match self {
            SagaError::Store(err) => err.is_storage_failure(),
            SagaError::Serialization(_) => true,
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
