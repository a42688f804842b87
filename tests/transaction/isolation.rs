//! Concurrent transactions never observe each other's ambient session.

use std::sync::Barrier;
use std::thread;

use futures_util::future::join_all;
use serde_json::json;

use ambient_txn::{
    current_session, intercept, is_in_transaction, run_in_transaction_with, AmbientSnapshot,
    InTransactionExt, MemoryStore, RunInTransactionOptions, Session, TxnError,
};

#[test]
fn each_thread_keeps_its_own_session() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));
    let barrier = Barrier::new(2);

    let ids = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let (store, users, barrier) = (&store, &users, &barrier);
                s.spawn(move || {
                    run_in_transaction_with(store, RunInTransactionOptions::new(), |session| {
                        users.insert(json!({"_id": i}), None)?;
                        barrier.wait();
                        let ambient = current_session().unwrap();
                        assert_eq!(ambient.id(), session.id());
                        Ok(ambient.id())
                    })
                    .unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_ne!(ids[0], ids[1]);
    assert_eq!(users.raw().committed_documents().len(), 2);
}

#[test]
fn plain_threads_do_not_inherit_the_transaction() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));

    let err = run_in_transaction_with(&store, RunInTransactionOptions::new(), |_| {
        thread::scope(|s| {
            s.spawn(|| {
                assert!(!is_in_transaction());
                // Not ambient here, so this write commits on its own.
                users.insert(json!({"_id": "outside"}), None)
            })
            .join()
            .unwrap()
        })?;
        users.insert(json!({"_id": "inside"}), None)?;
        Err::<(), _>(TxnError::msg("roll back"))
    })
    .unwrap_err();

    assert_eq!(err.to_string(), "roll back");
    let ids: Vec<_> = users
        .raw()
        .committed_documents()
        .into_iter()
        .map(|doc| doc["_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("outside")]);
}

#[test]
fn snapshot_carries_the_transaction_across_threads() {
    let store = MemoryStore::new().unwrap();
    let users = intercept(store.collection("users"));

    run_in_transaction_with(&store, RunInTransactionOptions::new(), |_| {
        let snapshot = AmbientSnapshot::capture();
        thread::scope(|s| {
            s.spawn(|| {
                snapshot.enter(|| {
                    assert!(is_in_transaction());
                    users.insert(json!({"_id": "joined"}), None)
                })
            })
            .join()
            .unwrap()
        })?;
        assert!(users.raw().committed_documents().is_empty());
        Ok(())
    })
    .unwrap();

    assert_eq!(users.raw().committed_documents().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_tasks_keep_their_own_session() {
    let store = MemoryStore::new().unwrap();
    let mut expected = Vec::new();
    let mut tasks = Vec::new();

    for _ in 0..4 {
        let task = run_in_transaction_with(&store, RunInTransactionOptions::new(), |session| {
            expected.push(session.id());
            Ok(tokio::spawn(
                async {
                    tokio::task::yield_now().await;
                    current_session().map(|s| s.id())
                }
                .in_current_transaction(),
            ))
        })
        .unwrap();
        tasks.push(task);
    }

    let seen: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    assert_eq!(seen, expected);
    assert!(current_session().is_none());
}
