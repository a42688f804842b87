use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

use super::session::MemorySession;
use super::view::{TxnState, View};
use crate::core::errors::{StorageError, StorageErrorKind};
use crate::{Document, TxnError};

#[derive(Debug, Clone)]
pub(crate) struct Versioned {
    pub doc: Document,
    pub version: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CollectionData {
    pub docs: BTreeMap<String, Versioned>,
    pub indexes: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub sessions_started: AtomicU64,
    pub sessions_ended: AtomicU64,
    pub commits: AtomicU64,
    pub aborts: AtomicU64,
}

/// Committed state shared by the store, its sessions and its collections.
#[derive(Debug, Default)]
pub(crate) struct StoreData {
    pub collections: RwLock<HashMap<String, CollectionData>>,
    current_version: AtomicU64,
    sessions: Mutex<HashMap<Uuid, Weak<MemorySession>>>,
    commit_faults: Mutex<VecDeque<StorageErrorKind>>,
    pub counters: Counters,
}

impl StoreData {
    pub fn allocate_version(&self) -> u64 {
        self.current_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn committed_version(&self, collection: &str, key: &str) -> u64 {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.docs.get(key))
            .map_or(0, |v| v.version)
    }

    pub fn register_session(&self, session: &Arc<MemorySession>) {
        self.sessions
            .lock()
            .insert(session.session_id(), Arc::downgrade(session));
        self.counters.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unregister_session(&self, id: Uuid) {
        if self.sessions.lock().remove(&id).is_some() {
            self.counters.sessions_ended.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Resolve a session id carried by an operation's options.
    pub fn session(&self, id: Uuid) -> Result<Arc<MemorySession>, StorageError> {
        self.sessions
            .lock()
            .get(&id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                StorageError::new(
                    StorageErrorKind::SessionEnded,
                    format!("session {id} has ended or belongs to another store"),
                )
            })
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn inject_commit_faults(&self, kind: StorageErrorKind, count: usize) {
        self.commit_faults
            .lock()
            .extend(std::iter::repeat(kind).take(count));
    }

    pub fn next_commit_fault(&self) -> Option<StorageErrorKind> {
        self.commit_faults.lock().pop_front()
    }

    /// Apply a write set atomically. Fails with a write conflict if any written
    /// document changed since the transaction first touched it.
    pub fn commit(&self, txn: &TxnState) -> Result<(), StorageError> {
        if txn.writes.is_empty() {
            return Ok(());
        }

        let mut collections = self.collections.write();
        for (collection, key) in txn.writes.keys() {
            let current = collections
                .get(collection)
                .and_then(|c| c.docs.get(key))
                .map_or(0, |v| v.version);
            let seen = txn.observed_version(collection, key);
            if current != seen {
                return Err(StorageError::new(
                    StorageErrorKind::WriteConflict,
                    format!("document {key} in {collection} was modified concurrently"),
                ));
            }
        }

        let version = self.allocate_version();
        for ((collection, key), write) in &txn.writes {
            match write {
                Some(doc) => {
                    collections.entry(collection.clone()).or_default().docs.insert(
                        key.clone(),
                        Versioned {
                            doc: doc.clone(),
                            version,
                        },
                    );
                }
                None => {
                    if let Some(coll) = collections.get_mut(collection) {
                        coll.docs.remove(key);
                    }
                }
            }
        }
        Ok(())
    }

    /// Run a single operation outside any session transaction.
    pub fn autocommit<R>(
        &self,
        op: impl FnOnce(&mut View<'_>) -> Result<R, TxnError>,
    ) -> Result<R, TxnError> {
        let mut txn = TxnState::new();
        let result = op(&mut View::new(self, &mut txn))?;
        self.commit(&txn)?;
        Ok(result)
    }
}

/// Runs callback-style operations off the caller's thread.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    runtime: Option<Runtime>,
}

impl Dispatcher {
    pub fn new() -> Result<Self, TxnError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ambient-txn-dispatch")
            .enable_all()
            .build()
            .map_err(|e| StorageError::other(format!("failed to start dispatcher: {e}")))?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(runtime) = &self.runtime {
            runtime.spawn_blocking(job);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Must not block: the last handle may be dropped inside an async context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
