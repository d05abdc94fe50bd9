//! Domain layer for the order fulfillment saga.
//!
//! This crate provides:
//! - The `Transaction` aggregate with its state machine
//! - Stock levels and reservations
//! - Payment callbacks
//! - The terminal events written to the outbox

pub mod callback;
pub mod error;
pub mod events;
pub mod reservation;
pub mod transaction;

pub use callback::{PaymentCallback, PaymentOutcome, PendingCallback};
pub use error::DomainError;
pub use events::{
    DomainEvent, EventOutcome, TransactionCancelledData, TransactionCompletedData,
    TransactionEvent,
};
pub use reservation::{ReservationStatus, StockKey, StockLevel, StockReservation};
pub use transaction::{
    CancellationReason, LineItem, Transaction, TransactionRecord, TransactionStatus,
    UnknownVariant,
};
