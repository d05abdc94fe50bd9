//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod payments;
pub mod stock;
pub mod transactions;

use std::sync::Arc;

use saga::{FulfillmentSaga, PaymentGateway};
use store::TransactionStore;

/// Shared application state available to every handler.
pub struct AppState<S: TransactionStore, G: PaymentGateway> {
    pub saga: Arc<FulfillmentSaga<S, G>>,
}

impl<S: TransactionStore, G: PaymentGateway> AppState<S, G> {
    pub fn new(saga: Arc<FulfillmentSaga<S, G>>) -> Self {
        Self { saga }
    }

    pub fn store(&self) -> &S {
        self.saga.store()
    }
}
