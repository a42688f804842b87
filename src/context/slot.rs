//! The ambient transaction slot.
//!
//! Each thread holds at most one bound [`TransactionContext`]. Bindings are
//! scoped: [`scope`] returns a guard that puts the previous value back when it
//! drops, so the slot is restored on return, early `?` exit and unwinding
//! alike. Work that leaves the current thread carries the context explicitly,
//! either as an [`AmbientSnapshot`] or by wrapping a future with
//! [`InTransactionExt::in_current_transaction`].

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::TransactionContext;

thread_local! {
    static CURRENT: RefCell<Option<Arc<TransactionContext>>> = const { RefCell::new(None) };
}

/// The context bound on this thread, if any.
pub fn current() -> Option<Arc<TransactionContext>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Restores the previously bound context on drop.
#[must_use = "the binding is undone as soon as the guard drops"]
pub struct ScopeGuard {
    previous: Option<Option<Arc<TransactionContext>>>,
    // Bound to the thread whose slot it restores.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // The slot may already be gone during thread teardown.
            let _ = CURRENT.try_with(|slot| *slot.borrow_mut() = previous);
        }
    }
}

/// Bind `context` (or clear the slot with `None`) until the guard drops.
pub fn scope(context: Option<Arc<TransactionContext>>) -> ScopeGuard {
    let previous = CURRENT.with(|slot| slot.replace(context));
    ScopeGuard {
        previous: Some(previous),
        _not_send: PhantomData,
    }
}

/// Run `body` with `context` visible to [`current`] for its whole dynamic extent.
pub fn bind_and_run<R>(context: Arc<TransactionContext>, body: impl FnOnce() -> R) -> R {
    let _guard = scope(Some(context));
    body()
}

/// The ambient environment captured at one point, re-enterable from any thread.
#[derive(Debug, Clone, Default)]
pub struct AmbientSnapshot {
    context: Option<Arc<TransactionContext>>,
}

impl AmbientSnapshot {
    pub fn capture() -> Self {
        Self { context: current() }
    }

    pub fn context(&self) -> Option<&Arc<TransactionContext>> {
        self.context.as_ref()
    }

    /// Run `body` with the captured environment bound, including "no transaction".
    pub fn enter<R>(&self, body: impl FnOnce() -> R) -> R {
        let _guard = scope(self.context.clone());
        body()
    }
}

/// A future that re-enters a captured ambient environment on every poll.
pub struct InTransaction<F> {
    snapshot: AmbientSnapshot,
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for InTransaction<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = scope(this.snapshot.context.clone());
        this.inner.as_mut().poll(cx)
    }
}

pub trait InTransactionExt: Future + Sized {
    /// Carry the context bound right now into this future, wherever it is polled.
    fn in_current_transaction(self) -> InTransaction<Self> {
        self.in_snapshot(AmbientSnapshot::capture())
    }

    fn in_snapshot(self, snapshot: AmbientSnapshot) -> InTransaction<Self> {
        InTransaction {
            snapshot,
            inner: Box::pin(self),
        }
    }
}

impl<F: Future> InTransactionExt for F {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::core::options::SessionOptions;
    use crate::memory::MemoryStore;

    fn context(store: &MemoryStore) -> Arc<TransactionContext> {
        let session = store.start_session(&SessionOptions::default()).unwrap();
        Arc::new(TransactionContext::new(session, false))
    }

    #[test]
    fn empty_outside_any_binding() {
        assert!(current().is_none());
    }

    #[test]
    fn restores_previous_binding() {
        let store = MemoryStore::new().unwrap();
        let outer = context(&store);
        let inner = context(&store);

        bind_and_run(outer.clone(), || {
            assert!(Arc::ptr_eq(&current().unwrap(), &outer));
            bind_and_run(inner.clone(), || {
                assert!(Arc::ptr_eq(&current().unwrap(), &inner));
            });
            assert!(Arc::ptr_eq(&current().unwrap(), &outer));
        });
        assert!(current().is_none());
    }

    #[test]
    fn restores_after_panic() {
        let store = MemoryStore::new().unwrap();
        let ctx = context(&store);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bind_and_run(ctx, || panic!("inside"));
        }));
        assert!(result.is_err());
        assert!(current().is_none());
    }

    #[test]
    fn threads_do_not_share_bindings() {
        let store = MemoryStore::new().unwrap();
        let ctx = context(&store);
        bind_and_run(ctx, || {
            let seen = std::thread::spawn(|| current().is_some()).join().unwrap();
            assert!(!seen);
        });
    }

    #[test]
    fn snapshot_carries_context_to_another_thread() {
        let store = MemoryStore::new().unwrap();
        let ctx = context(&store);
        let snapshot = bind_and_run(ctx.clone(), AmbientSnapshot::capture);

        let seen = std::thread::spawn(move || snapshot.enter(|| current().map(|c| c.session().id())))
            .join()
            .unwrap();
        assert_eq!(seen, Some(ctx.session().id()));
        assert!(current().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn future_keeps_context_across_tasks() {
        let store = MemoryStore::new().unwrap();
        let ctx = context(&store);
        let expected = ctx.session().id();

        let fut = bind_and_run(ctx, || {
            async {
                tokio::task::yield_now().await;
                current().map(|c| c.session().id())
            }
            .in_current_transaction()
        });
        let seen = tokio::spawn(fut).await.unwrap();
        assert_eq!(seen, Some(expected));
    }
}
