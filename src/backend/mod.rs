//! Collaborator interfaces: the session-aware store and its data-access surface.
//!
//! The transaction layer never talks to a concrete database. It opens sessions
//! through [`Backend`], drives them through [`Session`], and forwards
//! data operations to a [`RawCollection`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::core::options::{CallOptions, SessionOptions, TransactionOptions};
use crate::intercept::{Callback, Operation, Params};
use crate::TxnError;

/// Type-erased body handed to [`Session::with_transaction`]. It may run more than once.
pub type TransactionBody<'a> = dyn FnMut() -> Result<(), TxnError> + 'a;

/// A transactional session. Methods take `&self` because the handle is shared
/// with callbacks that may run on other threads.
pub trait Session: Send + Sync {
    fn id(&self) -> Uuid;

    fn start_transaction(&self, options: &TransactionOptions) -> Result<(), TxnError>;

    fn commit_transaction(&self) -> Result<(), TxnError>;

    fn abort_transaction(&self) -> Result<(), TxnError>;

    /// Release the session. Ending a session with an open transaction aborts it.
    fn end_session(&self) -> Result<(), TxnError>;

    /// Run `body` inside a transaction, retrying the body on transient errors and
    /// the commit on unknown commit results. The session owns commit and abort.
    fn with_transaction(
        &self,
        body: &mut TransactionBody<'_>,
        options: &TransactionOptions,
    ) -> Result<(), TxnError>;

    fn in_transaction(&self) -> bool;

    fn has_ended(&self) -> bool;
}

pub type SessionHandle = Arc<dyn Session>;

impl fmt::Debug for dyn Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

pub trait Backend: Send + Sync {
    fn start_session(&self, options: &SessionOptions) -> Result<SessionHandle, TxnError>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn start_session(&self, options: &SessionOptions) -> Result<SessionHandle, TxnError> {
        (**self).start_session(options)
    }
}

/// The un-intercepted data-access surface of one collection.
///
/// When `callback` is `Some`, the implementation may complete the operation
/// asynchronously and deliver its result to the callback; the returned value is
/// then `Value::Null`.
pub trait RawCollection: Send + Sync {
    fn name(&self) -> &str;

    fn call(
        &self,
        operation: Operation,
        params: Params,
        options: Option<CallOptions>,
        callback: Option<Callback>,
    ) -> Result<Value, TxnError>;
}

impl<C: RawCollection + ?Sized> RawCollection for Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn call(
        &self,
        operation: Operation,
        params: Params,
        options: Option<CallOptions>,
        callback: Option<Callback>,
    ) -> Result<Value, TxnError> {
        (**self).call(operation, params, options, callback)
    }
}
