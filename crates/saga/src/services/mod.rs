//! Payment gateway clients used by the saga.

pub mod http;
pub mod payment;

pub use http::HttpPaymentGateway;
pub use payment::{InMemoryPaymentGateway, PaymentAdapter, PaymentGateway};
