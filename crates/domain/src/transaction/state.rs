//! Transaction state machine.

use serde::{Deserialize, Serialize};

/// The status of a transaction in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► StockReserved ──► AwaitingPayment ──► Paid ──► Completed
///    │              │                  │
///    └──────────────┴──────────────────┴──► Cancelled (reason)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Transaction exists, no stock held yet.
    #[default]
    Created,

    /// Every line item has a HELD reservation.
    StockReserved,

    /// A payment intent exists at the gateway; waiting for its callback.
    AwaitingPayment,

    /// The gateway confirmed payment.
    Paid,

    /// Reservations committed (terminal state).
    Completed,

    /// Reservations released (terminal state).
    Cancelled,
}

impl TransactionStatus {
    /// Returns true if stock can be marked reserved in this state.
    pub fn can_mark_reserved(&self) -> bool {
        matches!(self, TransactionStatus::Created)
    }

    /// Returns true if a payment intent can be attached in this state.
    pub fn can_await_payment(&self) -> bool {
        matches!(self, TransactionStatus::StockReserved)
    }

    /// Returns true if a payment outcome is accepted in this state.
    pub fn accepts_payment_outcome(&self) -> bool {
        matches!(self, TransactionStatus::AwaitingPayment)
    }

    /// Returns true if the transaction can be completed in this state.
    pub fn can_complete(&self) -> bool {
        matches!(self, TransactionStatus::Paid)
    }

    /// Returns true if the transaction can be cancelled for the given reason.
    pub fn can_cancel(&self, reason: CancellationReason) -> bool {
        match reason {
            CancellationReason::ReserveFailed => matches!(self, TransactionStatus::Created),
            CancellationReason::PaymentFailed | CancellationReason::Expired => matches!(
                self,
                TransactionStatus::StockReserved | TransactionStatus::AwaitingPayment
            ),
        }
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Cancelled
        )
    }

    /// Returns the state name as stored and reported externally.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "CREATED",
            TransactionStatus::StockReserved => "STOCK_RESERVED",
            TransactionStatus::AwaitingPayment => "AWAITING_PAYMENT",
            TransactionStatus::Paid => "PAID",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(TransactionStatus::Created),
            "STOCK_RESERVED" => Ok(TransactionStatus::StockReserved),
            "AWAITING_PAYMENT" => Ok(TransactionStatus::AwaitingPayment),
            "PAID" => Ok(TransactionStatus::Paid),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Why a transaction was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationReason {
    /// At least one line item could not be reserved.
    ReserveFailed,

    /// The gateway declined the payment, or no payment intent could be obtained.
    PaymentFailed,

    /// No payment outcome arrived before the deadline.
    Expired,
}

impl CancellationReason {
    /// Returns the reason name as stored and reported externally.
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationReason::ReserveFailed => "RESERVE_FAILED",
            CancellationReason::PaymentFailed => "PAYMENT_FAILED",
            CancellationReason::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CancellationReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVE_FAILED" => Ok(CancellationReason::ReserveFailed),
            "PAYMENT_FAILED" => Ok(CancellationReason::PaymentFailed),
            "EXPIRED" => Ok(CancellationReason::Expired),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A stored enum value that no variant matches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);
