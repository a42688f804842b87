pub mod aggregate;
pub mod executor;
pub mod tracker;

pub use aggregate::{CallbackErrors, CALLBACK_ERROR_FALLBACK};
pub use executor::{current_session, is_in_transaction, run_in_transaction, run_in_transaction_with};
pub use tracker::{track_future, wrap_callback, BoxedCallback, CallbackTracker, TrackedFuture};
