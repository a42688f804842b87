//! The retrying strategy under injected faults and real contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use serde_json::json;

use ambient_txn::{
    intercept, run_in_transaction_with, Arg, MemoryStore, RunInTransactionOptions, StorageError,
    StorageErrorKind, TxnError,
};

fn retrying() -> RunInTransactionOptions {
    RunInTransactionOptions::new().retry(true)
}

#[test]
fn transient_commit_failure_reruns_the_body() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));
    store.fail_next_commits(StorageErrorKind::WriteConflict, 2);

    let mut attempts = 0;
    let id = run_in_transaction_with(&store, retrying(), |_| {
        attempts += 1;
        users.insert(json!({"attempt": attempts}), None)
    })
    .unwrap();

    assert_eq!(attempts, 3);
    let committed = users.raw().committed_documents();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0]["_id"], id);
    assert_eq!(committed[0]["attempt"], json!(3));
}

#[test]
fn unknown_commit_result_retries_only_the_commit() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));
    store.fail_next_commits(StorageErrorKind::UnknownCommitResult, 1);

    let mut attempts = 0;
    run_in_transaction_with(&store, retrying(), |_| {
        attempts += 1;
        users.insert(json!({"_id": "once"}), None)
    })
    .unwrap();

    assert_eq!(attempts, 1);
    assert_eq!(users.raw().committed_documents().len(), 1);
}

#[test]
fn direct_strategy_surfaces_transient_errors() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));
    store.fail_next_commits(StorageErrorKind::WriteConflict, 1);

    let err = run_in_transaction_with(&store, RunInTransactionOptions::new(), |_| {
        users.insert(json!({"_id": "x"}), None)
    })
    .unwrap_err();

    assert!(err.is_transient());
    assert!(users.raw().committed_documents().is_empty());
    assert_eq!(store.stats().open_sessions, 0);
}

#[test]
fn non_transient_errors_are_not_retried() {
    let store = MemoryStore::new().unwrap();

    let mut attempts = 0;
    let err = run_in_transaction_with(&store, retrying(), |_| {
        attempts += 1;
        Err::<(), _>(TxnError::msg("business rule violated"))
    })
    .unwrap_err();

    assert_eq!(attempts, 1);
    assert_eq!(err.to_string(), "business rule violated");
}

#[test]
fn callbacks_are_drained_on_every_attempt() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));
    let runs = Arc::new(AtomicUsize::new(0));
    store.fail_next_commits(StorageErrorKind::WriteConflict, 1);

    let mut attempts = 0;
    run_in_transaction_with(&store, retrying().wait_for_callbacks(true), |_| {
        attempts += 1;
        let runs = runs.clone();
        users.call(
            "insert",
            vec![
                json!({"_id": "once"}).into(),
                Arg::callback(move |result| {
                    result?;
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            ],
        )?;
        Ok(())
    })
    .unwrap();

    assert_eq!(attempts, 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(users.raw().committed_documents().len(), 1);
}

#[test]
fn failed_attempt_errors_do_not_leak_into_the_retry() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));
    let options = retrying()
        .wait_for_callbacks(true)
        .catch_callback_errors(true);

    let mut attempts = 0;
    run_in_transaction_with(&store, options, |_| {
        attempts += 1;
        if attempts == 1 {
            users.call(
                "count",
                vec![
                    json!({}).into(),
                    Arg::callback(|_| Err(TxnError::msg("stale"))),
                ],
            )?;
            return Err(StorageError::new(StorageErrorKind::WriteConflict, "lost a race").into());
        }
        users.insert(json!({"_id": "second"}), None)
    })
    .unwrap();

    assert_eq!(attempts, 2);
    assert_eq!(users.raw().committed_documents().len(), 1);
    assert_eq!(store.stats().open_sessions, 0);
}

#[test]
fn captured_callback_errors_are_not_retried() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));
    let options = retrying()
        .wait_for_callbacks(true)
        .catch_callback_errors(true);

    let mut attempts = 0;
    let err = run_in_transaction_with(&store, options, |_| {
        attempts += 1;
        users.call(
            "insert",
            vec![
                json!({"_id": "doomed"}).into(),
                Arg::callback(|_| Err(TxnError::msg("callback refused"))),
            ],
        )?;
        Ok(())
    })
    .unwrap_err();

    assert_eq!(attempts, 1);
    let TxnError::Callback(errors) = err else {
        panic!("expected captured callback errors, got {err:?}");
    };
    assert_eq!(errors.message(), "callback refused");
    assert!(users.raw().committed_documents().is_empty());
    assert_eq!(store.stats().open_sessions, 0);
}

#[test]
fn concurrent_increments_are_serialized() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 5;

    let store = MemoryStore::new().unwrap();
    let counters = intercept(store.collection("counters"));
    counters.insert(json!({"_id": "hits", "n": 0}), None).unwrap();

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    run_in_transaction_with(&store, retrying(), |_| {
                        let current = counters
                            .find_one(json!({"_id": "hits"}), None)?
                            .and_then(|doc| doc.get("n").and_then(|n| n.as_i64()))
                            .unwrap_or_default();
                        counters.update(json!({"_id": "hits"}), json!({"$set": {"n": current + 1}}), None)?;
                        Ok(())
                    })
                    .unwrap();
                }
            });
        }
    });

    let hits = counters.find_one(json!({"_id": "hits"}), None).unwrap().unwrap();
    assert_eq!(hits["n"], json!(THREADS * ROUNDS));
    assert_eq!(store.stats().open_sessions, 0);
}
