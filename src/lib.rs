pub mod backend;
pub mod context;
mod core;
pub mod intercept;
pub mod memory;
pub mod txn;

pub use crate::backend::{Backend, RawCollection, Session, SessionHandle, TransactionBody};
pub use crate::context::{AmbientSnapshot, InTransaction, InTransactionExt, TransactionContext};
pub use crate::core::document::{matches_selector, normalize_document};
pub use crate::core::errors::{DocumentValidationError, StorageError, StorageErrorKind, TxnError};
pub use crate::core::options::{
    default_options, set_default_options, Acknowledgment, CallOptions, ReadConcern,
    RunInTransactionOptions, SessionOptions, TransactionOptions, WriteConcern,
};
pub use crate::intercept::{intercept, Arg, Arity, Callback, InterceptedCollection, Operation, Params};
pub use crate::memory::{MemoryCollection, MemorySession, MemoryStore, StoreStats};
pub use crate::txn::{
    current_session, is_in_transaction, run_in_transaction, run_in_transaction_with, track_future,
    wrap_callback, BoxedCallback, CallbackErrors, CallbackTracker, TrackedFuture,
};

pub type Document = serde_json::Map<String, serde_json::Value>;
