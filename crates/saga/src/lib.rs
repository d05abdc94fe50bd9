//! Order fulfillment saga.
//!
//! Orchestrates a transaction across the stock ledger, the payment gateway and
//! the outbox without a distributed transaction:
//!
//! 1. Reserve stock for every line item (all-or-nothing)
//! 2. Request a payment intent from the gateway
//! 3. Apply the gateway's callback: commit stock on payment, release it on failure
//!
//! Transactions left without an outcome past their deadline are expired by the
//! [`ReservationSweeper`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod services;
pub mod sweeper;

pub use config::{SagaConfig, SweeperConfig};
pub use coordinator::{
    CallbackOutcome, Created, ExpireOutcome, FulfillmentSaga, TransactionDetails,
};
pub use error::{GatewayError, Result, SagaError};
pub use services::{
    HttpPaymentGateway, InMemoryPaymentGateway, PaymentAdapter, PaymentGateway,
};
pub use sweeper::{ReservationSweeper, SweepReport};
