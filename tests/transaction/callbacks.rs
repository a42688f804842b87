//! Callback draining and captured callback errors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use ambient_txn::{
    intercept, is_in_transaction, run_in_transaction_with, track_future, wrap_callback, Arg,
    BoxedCallback, MemoryStore, RunInTransactionOptions, TxnError,
};

fn draining() -> RunInTransactionOptions {
    RunInTransactionOptions::new().wait_for_callbacks(true)
}

#[test]
fn drain_with_no_callbacks_returns_at_once() {
    let store = MemoryStore::new().unwrap();
    let value = run_in_transaction_with(&store, draining(), |_| Ok(7)).unwrap();
    assert_eq!(value, 7);
}

#[test]
fn callback_runs_before_commit() {
    let store = MemoryStore::new().unwrap();
    let users = Arc::new(intercept(store.collection("users")));
    let seen = Arc::new(AtomicUsize::new(0));

    run_in_transaction_with(&store, draining(), |_| {
        let seen = seen.clone();
        users.call(
            "insert",
            vec![
                json!({"_id": "alice"}).into(),
                Arg::callback(move |result| {
                    assert_eq!(result?, json!("alice"));
                    assert!(is_in_transaction());
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            ],
        )?;
        Ok(())
    })
    .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(users.raw().committed_documents().len(), 1);
}

#[test]
fn chained_callbacks_are_all_drained() {
    let store = MemoryStore::new().unwrap();
    let users = Arc::new(intercept(store.collection("users")));

    run_in_transaction_with(&store, draining(), |_| {
        let chained = users.clone();
        users.call(
            "insert",
            vec![
                json!({"_id": 1}).into(),
                Arg::callback(move |result| {
                    result?;
                    // Still inside the transaction, so this one is tracked too.
                    chained.call(
                        "insert",
                        vec![json!({"_id": 2}).into(), Arg::callback(|result| result.map(drop))],
                    )?;
                    Ok(())
                }),
            ],
        )?;
        Ok(())
    })
    .unwrap();

    assert_eq!(users.raw().committed_documents().len(), 2);
}

#[test]
fn many_callbacks_all_complete() {
    let store = MemoryStore::new().unwrap();
    let users = Arc::new(intercept(store.collection("users")));
    let done = Arc::new(AtomicUsize::new(0));

    run_in_transaction_with(&store, draining(), |_| {
        for i in 0..10 {
            let done = done.clone();
            users.call(
                "insert",
                vec![
                    json!({"_id": i}).into(),
                    Arg::callback(move |result| {
                        result?;
                        std::thread::sleep(Duration::from_millis(2));
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                ],
            )?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(done.load(Ordering::SeqCst), 10);
    assert_eq!(users.raw().committed_documents().len(), 10);
}

#[test]
fn captured_errors_fail_the_transaction_in_order() {
    let store = MemoryStore::new().unwrap();
    let users = Arc::new(intercept(store.collection("users")));
    let options = draining().catch_callback_errors(true);

    let err = run_in_transaction_with(&store, options, |_| {
        users.insert(json!({"_id": "kept?"}), None)?;
        // The first callback finishes last.
        users.call(
            "count",
            vec![
                json!({}).into(),
                Arg::callback(|_| {
                    std::thread::sleep(Duration::from_millis(50));
                    Err(TxnError::msg("first"))
                }),
            ],
        )?;
        users.call(
            "count",
            vec![
                json!({}).into(),
                Arg::callback(|_| Err(TxnError::msg("second"))),
            ],
        )?;
        Ok(())
    })
    .unwrap_err();

    let TxnError::Callback(errors) = err else {
        panic!("expected captured callback errors, got {err:?}");
    };
    assert_eq!(errors.to_string(), "first");
    let messages: Vec<_> = errors.errors().iter().map(|e| e.to_string()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert!(users.raw().committed_documents().is_empty());
}

#[test]
fn captured_panic_becomes_an_error() {
    let store = MemoryStore::new().unwrap();
    let users = Arc::new(intercept(store.collection("users")));
    let options = draining().catch_callback_errors(true);

    let err = run_in_transaction_with(&store, options, |_| {
        users.call(
            "count",
            vec![
                json!({}).into(),
                Arg::callback(|_| panic!("callback exploded")),
            ],
        )?;
        Ok(())
    })
    .unwrap_err();

    let TxnError::Callback(errors) = err else {
        panic!("expected captured callback errors, got {err:?}");
    };
    assert_eq!(errors.to_string(), "callback exploded");
    assert!(matches!(errors.errors()[0], TxnError::CallbackPanic { .. }));
    assert_eq!(store.stats().open_sessions, 0);
}

#[test]
fn uncaptured_callback_error_does_not_fail_the_transaction() {
    let store = MemoryStore::new().unwrap();
    let users = Arc::new(intercept(store.collection("users")));

    run_in_transaction_with(&store, draining(), |_| {
        users.call(
            "insert",
            vec![
                json!({"_id": 1}).into(),
                Arg::callback(|_| Err(TxnError::msg("ignored"))),
            ],
        )?;
        Ok(())
    })
    .unwrap();

    assert_eq!(users.raw().committed_documents().len(), 1);
}

#[test]
fn dropped_callback_releases_the_drain() {
    let store = MemoryStore::new().unwrap();

    run_in_transaction_with(&store, draining(), |_| {
        let never_called: BoxedCallback<()> = wrap_callback(Box::new(|()| Ok(())));
        drop(never_called);
        Ok(())
    })
    .unwrap();
}

#[test]
fn tracked_futures_are_drained() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let store = MemoryStore::new().unwrap();
    let users = Arc::new(intercept(store.collection("users")));

    run_in_transaction_with(&store, draining(), |_| {
        let users = users.clone();
        runtime.spawn(track_future(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(is_in_transaction());
            users.insert(json!({"_id": "late"}), None)?;
            Ok::<(), TxnError>(())
        }));
        Ok(())
    })
    .unwrap();

    assert_eq!(users.raw().committed_documents().len(), 1);
}
