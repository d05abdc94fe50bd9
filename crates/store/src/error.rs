use common::{CallbackId, IdempotencyKey, ProductId, ReservationId, TransactionId, Version, WarehouseId};
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction was modified since it was loaded.
    #[error("Concurrency conflict for transaction {transaction_id}: expected {expected}")]
    ConcurrencyConflict {
        transaction_id: TransactionId,
        expected: Version,
    },

    /// Not enough unreserved stock for the requested quantity.
    #[error(
        "Insufficient stock for {product_id} at {warehouse_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        warehouse_id: WarehouseId,
        product_id: ProductId,
        requested: u64,
        available: u64,
    },

    /// A transaction with this idempotency key already exists.
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(IdempotencyKey),

    /// The callback id was already recorded.
    #[error("Duplicate callback: {0}")]
    DuplicateCallback(CallbackId),

    /// The transaction was not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The reservation was not found.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// A stored value could not be mapped back to a domain type.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for failures of the storage layer itself, as opposed to domain rejections.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_)
                | StoreError::Migration(_)
                | StoreError::Serialization(_)
                | StoreError::CorruptRow(_)
        )
    }
}

impl From<domain::UnknownVariant> for StoreError {
    fn from(err: domain::UnknownVariant) -> Self {
        StoreError::CorruptRow(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
