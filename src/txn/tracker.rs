//! Completion tracking for callbacks and futures spawned inside a transaction.
//!
//! Every callback wrapped while a transaction is ambient holds a
//! [`PendingCallback`] guard. The guard is created at wrap time, before the
//! caller can schedule anything, and released when the callback has run or
//! has been dropped unrun. The executor drains by waiting for the pending
//! count to reach zero.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::{Condvar, Mutex};

use crate::context::{slot, TransactionContext};
use crate::TxnError;

/// A callback taking the operation's outcome. Returning `Err` is the callback failing.
pub type BoxedCallback<T> = Box<dyn FnOnce(T) -> Result<(), TxnError> + Send + 'static>;

#[derive(Debug, Default)]
struct TrackerState {
    pending: usize,
    drains: u64,
    registered: u64,
    /// Keyed by registration sequence, so completion order does not matter.
    errors: Vec<(u64, TxnError)>,
}

#[derive(Debug, Default)]
pub struct CallbackTracker {
    state: Mutex<TrackerState>,
    drained: Condvar,
}

impl CallbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks registered but not yet finished.
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// How many times the pending count has dropped from positive to zero.
    ///
    /// Every such transition counts, so this exceeds 1 when callbacks are
    /// registered again after an earlier drain.
    pub fn drain_count(&self) -> u64 {
        self.state.lock().drains
    }

    pub fn error_count(&self) -> usize {
        self.state.lock().errors.len()
    }

    fn record_error(&self, seq: u64, err: TxnError) {
        self.state.lock().errors.push((seq, err));
    }

    /// Remove and return the captured errors in callback registration order.
    pub(crate) fn take_errors(&self) -> Vec<TxnError> {
        let mut errors = std::mem::take(&mut self.state.lock().errors);
        errors.sort_by_key(|(seq, _)| *seq);
        errors.into_iter().map(|(_, err)| err).collect()
    }

    /// Block until no callback is pending. Returns at once if none is.
    pub fn wait_for_callbacks(&self) {
        let mut state = self.state.lock();
        while state.pending > 0 {
            self.drained.wait(&mut state);
        }
    }

    fn begin(&self) -> u64 {
        let mut state = self.state.lock();
        state.pending += 1;
        state.registered += 1;
        state.registered
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.pending > 0, "callback finished twice");
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            state.drains += 1;
            self.drained.notify_all();
        }
    }
}

/// Counts one in-flight callback for as long as it lives.
struct PendingCallback {
    context: Arc<TransactionContext>,
    seq: u64,
}

impl PendingCallback {
    fn register(context: Arc<TransactionContext>) -> Self {
        let seq = context.tracker().begin();
        Self { context, seq }
    }

    fn record_error(&self, err: TxnError) {
        self.context.tracker().record_error(self.seq, err);
    }
}

impl Drop for PendingCallback {
    fn drop(&mut self) {
        self.context.tracker().finish();
    }
}

/// Wrap `callback` for completion tracking under the ambient transaction.
///
/// Outside a transaction the same box is returned untouched.
pub fn wrap_callback<T: 'static>(callback: BoxedCallback<T>) -> BoxedCallback<T> {
    let Some(context) = slot::current() else {
        return callback;
    };
    let pending = PendingCallback::register(context);

    Box::new(move |value: T| {
        let context = pending.context.clone();
        let result = slot::bind_and_run(context, || guard_callback(&pending, || callback(value)));
        // Errors are recorded before the count can reach zero.
        drop(pending);
        result
    })
}

fn guard_callback(
    pending: &PendingCallback,
    body: impl FnOnce() -> Result<(), TxnError>,
) -> Result<(), TxnError> {
    if !pending.context.catch_callback_errors() {
        return body();
    }
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            pending.record_error(err);
            Ok(())
        }
        Err(payload) => {
            pending.record_error(TxnError::CallbackPanic {
                message: panic_message(payload.as_ref()),
            });
            Ok(())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Track an asynchronous unit of work the same way as a wrapped callback.
///
/// The future re-enters the transaction on every poll; the pending count is
/// released when it completes or is dropped.
pub fn track_future<F>(future: F) -> TrackedFuture<F>
where
    F: Future<Output = Result<(), TxnError>>,
{
    TrackedFuture {
        pending: slot::current().map(PendingCallback::register),
        inner: Box::pin(future),
    }
}

pub struct TrackedFuture<F> {
    pending: Option<PendingCallback>,
    inner: Pin<Box<F>>,
}

impl<F> Future for TrackedFuture<F>
where
    F: Future<Output = Result<(), TxnError>>,
{
    type Output = Result<(), TxnError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(pending) = this.pending.as_ref() else {
            return this.inner.as_mut().poll(cx);
        };

        let _guard = slot::scope(Some(pending.context.clone()));
        let inner = &mut this.inner;
        let polled = if pending.context.catch_callback_errors() {
            match panic::catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx))) {
                Ok(Poll::Ready(Err(err))) => {
                    pending.record_error(err);
                    Poll::Ready(Ok(()))
                }
                Ok(other) => other,
                Err(payload) => {
                    pending.record_error(TxnError::CallbackPanic {
                        message: panic_message(payload.as_ref()),
                    });
                    Poll::Ready(Ok(()))
                }
            }
        } else {
            inner.as_mut().poll(cx)
        };

        if polled.is_ready() {
            this.pending = None;
        }
        polled
    }
}
