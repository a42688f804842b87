pub mod slot;
mod transaction_context;

pub use slot::{current, AmbientSnapshot, InTransaction, InTransactionExt};
pub use transaction_context::TransactionContext;
