//! Domain error types.

use thiserror::Error;

use crate::transaction::TransactionStatus;

/// Errors raised by domain invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Transaction is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: TransactionStatus,
        action: &'static str,
    },

    /// Transaction has no line items.
    #[error("Transaction has no line items")]
    NoLineItems,

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be between 1 and {max})", max = i32::MAX)]
    InvalidQuantity { quantity: u32 },

    /// Invalid price.
    #[error("Invalid price: {price} (must be greater than 0)")]
    InvalidPrice { price: i64 },

    /// The order total does not fit in a 64-bit amount of cents.
    #[error("Order total is too large")]
    AmountOverflow,

    /// A required identifier was empty.
    #[error("{field} must not be blank")]
    BlankIdentifier { field: &'static str },

    /// A payment intent was already attached to the transaction.
    #[error("Gateway reference already set")]
    GatewayReferenceAlreadySet,
}
