//! Transaction aggregate and its state machine.

mod aggregate;
mod line_item;
mod state;

pub use aggregate::{Transaction, TransactionRecord};
pub use line_item::LineItem;
pub use state::{CancellationReason, TransactionStatus, UnknownVariant};
