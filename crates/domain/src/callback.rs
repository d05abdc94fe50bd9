//! Payment callbacks delivered by the gateway.

use chrono::{DateTime, Utc};
use common::{CallbackId, GatewayReference, TransactionId};
use serde::{Deserialize, Serialize};

use crate::transaction::UnknownVariant;

/// Result the gateway reports for a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Paid => "PAID",
            PaymentOutcome::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentOutcome {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PAID" => Ok(PaymentOutcome::Paid),
            "FAILED" => Ok(PaymentOutcome::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A processed callback. Stored once per `callback_id` so redelivery is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallback {
    pub callback_id: CallbackId,
    pub transaction_id: TransactionId,
    pub outcome: PaymentOutcome,
    pub received_at: DateTime<Utc>,
}

impl PaymentCallback {
    pub fn new(
        callback_id: CallbackId,
        transaction_id: TransactionId,
        outcome: PaymentOutcome,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            callback_id,
            transaction_id,
            outcome,
            received_at,
        }
    }
}

/// A callback whose gateway reference matched no transaction when it arrived.
///
/// Held until the payment intent is attached, then applied like any other
/// callback. Recording a [`PaymentCallback`] with the same id removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCallback {
    pub callback_id: CallbackId,
    pub gateway_reference: GatewayReference,
    pub outcome: PaymentOutcome,
    pub received_at: DateTime<Utc>,
}

impl PendingCallback {
    pub fn new(
        callback_id: CallbackId,
        gateway_reference: GatewayReference,
        outcome: PaymentOutcome,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            callback_id,
            gateway_reference,
            outcome,
            received_at,
        }
    }
}
