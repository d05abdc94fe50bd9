//! Shared value types for the fulfillment saga workspace.

pub mod money;
pub mod retry;
pub mod types;
pub mod version;

pub use money::Money;
pub use retry::RetryPolicy;
pub use types::{
    CallbackId, EventId, GatewayReference, IdempotencyKey, ProductId, ReservationId,
    TransactionId, WarehouseId,
};
pub use version::Version;
