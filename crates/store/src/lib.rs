//! Transactional storage for the fulfillment saga.
//!
//! Every state change is expressed as a [`UnitOfWork`] and committed
//! atomically: transaction row, stock counters, reservations, outbox rows and
//! callback records land together or not at all.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;
pub mod unit_of_work;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use outbox::OutboxEvent;
pub use postgres::PostgresStore;
pub use store::{OutboxStore, StockLedger, StockLedgerExt, TransactionStore};
pub use unit_of_work::{Settlement, TransactionWrite, UnitOfWork};
