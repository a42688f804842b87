//! Running a unit of work inside an ambient transaction.
//!
//! ```
//! use ambient_txn::{intercept, run_in_transaction, MemoryStore};
//! use serde_json::json;
//!
//! let store = MemoryStore::new().unwrap();
//! let users = intercept(store.collection("users"));
//!
//! let id = run_in_transaction(&store, |_session| {
//!     // No session argument: the insert picks up the ambient one.
//!     users.insert(json!({"name": "alice"}), None)
//! })
//! .unwrap();
//!
//! assert!(users.find_one(json!({"_id": id}), None).unwrap().is_some());
//! ```

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::backend::{Backend, Session, SessionHandle};
use crate::context::{slot, TransactionContext};
use crate::core::options::{default_options, RunInTransactionOptions};
use crate::txn::aggregate::CallbackErrors;
use crate::txn::tracker::CallbackTracker;
use crate::TxnError;

/// Run `work` in a new transaction configured by the process-wide defaults.
pub fn run_in_transaction<B, F, R>(backend: &B, work: F) -> Result<R, TxnError>
where
    B: Backend + ?Sized,
    F: FnMut(&SessionHandle) -> Result<R, TxnError>,
{
    run_in_transaction_with(backend, default_options(), work)
}

/// Run `work` in a new transaction.
///
/// Fails with [`TxnError::NestedTransaction`] before opening anything if a
/// transaction is already ambient. The session is ended and the ambient slot
/// restored on every exit path.
pub fn run_in_transaction_with<B, F, R>(
    backend: &B,
    options: RunInTransactionOptions,
    mut work: F,
) -> Result<R, TxnError>
where
    B: Backend + ?Sized,
    F: FnMut(&SessionHandle) -> Result<R, TxnError>,
{
    if slot::current().is_some() {
        return Err(TxnError::NestedTransaction);
    }

    let session = backend.start_session(&options.session_options)?;
    let _release = SessionRelease {
        session: session.clone(),
    };
    debug!(session = %session.id(), retry = options.retry, "session opened");

    let context = Arc::new(TransactionContext::new(
        session,
        options.captures_callback_errors(),
    ));
    slot::bind_and_run(context.clone(), || {
        if options.retry {
            run_retrying(&context, &options, &mut work)
        } else {
            run_direct(&context, &options, &mut work)
        }
    })
}

/// True while the ambient session has an active transaction.
pub fn is_in_transaction() -> bool {
    slot::current().is_some_and(|ctx| ctx.session().in_transaction())
}

/// The session of the ambient transaction, if any.
pub fn current_session() -> Option<SessionHandle> {
    slot::current().map(|ctx| ctx.session().clone())
}

fn run_direct<F, R>(
    context: &TransactionContext,
    options: &RunInTransactionOptions,
    work: &mut F,
) -> Result<R, TxnError>
where
    F: FnMut(&SessionHandle) -> Result<R, TxnError>,
{
    let session = context.session();
    session.start_transaction(&options.transaction_options)?;
    debug!(session = %session.id(), "transaction started");

    let outcome = run_body(context, options.wait_for_callbacks, work).and_then(|value| {
        session.commit_transaction()?;
        Ok(value)
    });

    match outcome {
        Ok(value) => {
            debug!(session = %session.id(), "transaction committed");
            Ok(value)
        }
        Err(err) => Err(abort_after(&**session, err)),
    }
}

fn run_retrying<F, R>(
    context: &TransactionContext,
    options: &RunInTransactionOptions,
    work: &mut F,
) -> Result<R, TxnError>
where
    F: FnMut(&SessionHandle) -> Result<R, TxnError>,
{
    let session = context.session();
    let mut output = None;
    let mut attempt = 0u32;

    session.with_transaction(
        &mut || -> Result<(), TxnError> {
            attempt += 1;
            if attempt > 1 {
                debug!(session = %session.id(), attempt, "re-running transaction body");
            }
            output = Some(run_body(context, options.wait_for_callbacks, &mut *work)?);
            Ok(())
        },
        &options.transaction_options,
    )?;

    output.ok_or(TxnError::NoResult)
}

/// The part shared by both strategies: work, drain, then captured callback errors.
fn run_body<F, R>(context: &TransactionContext, wait: bool, work: &mut F) -> Result<R, TxnError>
where
    F: FnMut(&SessionHandle) -> Result<R, TxnError>,
{
    // Leftovers from an earlier attempt of a retried body.
    context.tracker().take_errors();

    let result = {
        let _drain = DrainOnExit {
            tracker: context.tracker(),
            enabled: wait,
        };
        work(context.session())
    };

    let value = match result {
        Ok(value) => value,
        Err(err) => {
            let superseded = context.tracker().take_errors();
            if !superseded.is_empty() {
                warn!(count = superseded.len(), error = %err, "callback errors superseded by transaction failure");
            }
            return Err(err);
        }
    };

    match CallbackErrors::new(context.tracker().take_errors()) {
        Some(errors) => Err(errors.into()),
        None => Ok(value),
    }
}

fn abort_after(session: &dyn Session, err: TxnError) -> TxnError {
    if !session.in_transaction() {
        debug!(session = %session.id(), error = %err, "transaction already closed by backend");
        return err;
    }
    match session.abort_transaction() {
        Ok(()) => {
            debug!(session = %session.id(), error = %err, "transaction aborted");
            err
        }
        Err(abort_err) => {
            error!(
                session = %session.id(),
                original = %err,
                abort = %abort_err,
                "abort failed after transaction error"
            );
            abort_err
        }
    }
}

/// Waits for tracked callbacks when dropped, whichever way the body exits.
struct DrainOnExit<'a> {
    tracker: &'a CallbackTracker,
    enabled: bool,
}

impl Drop for DrainOnExit<'_> {
    fn drop(&mut self) {
        if self.enabled {
            self.tracker.wait_for_callbacks();
        }
    }
}

/// Ends the session when the executor leaves, including by unwinding.
struct SessionRelease {
    session: SessionHandle,
}

impl Drop for SessionRelease {
    fn drop(&mut self) {
        match self.session.end_session() {
            Ok(()) => debug!(session = %self.session.id(), "session ended"),
            Err(err) => warn!(session = %self.session.id(), error = %err, "failed to end session"),
        }
    }
}
