//! In-process backend with real session and transaction semantics.
//!
//! Transactions buffer their writes and validate them at commit: a document
//! written by two overlapping transactions fails the second commit with a
//! transient write conflict. Reads see committed data plus the transaction's
//! own writes.

mod collection;
mod session;
mod store;
mod update;
mod view;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

pub use collection::MemoryCollection;
pub use session::{MemorySession, WITH_TRANSACTION_TIMEOUT};
pub use update::apply_update;

use crate::backend::{Backend, SessionHandle};
use crate::core::errors::{StorageError, StorageErrorKind};
use crate::core::options::SessionOptions;
use crate::TxnError;
use store::{Dispatcher, StoreData};

/// Session and commit counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub open_sessions: usize,
    pub commits: u64,
    pub aborts: u64,
}

/// Cheap to clone; clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data: Arc<StoreData>,
    dispatcher: Arc<Dispatcher>,
}

impl MemoryStore {
    pub fn new() -> Result<Self, TxnError> {
        Ok(Self {
            data: Arc::new(StoreData::default()),
            dispatcher: Arc::new(Dispatcher::new()?),
        })
    }

    pub fn collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection::new(name, self.data.clone(), self.dispatcher.clone())
    }

    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.data.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Fail the next `count` commits with `kind`, for exercising retry paths.
    pub fn fail_next_commits(&self, kind: StorageErrorKind, count: usize) {
        self.data.inject_commit_faults(kind, count);
    }

    pub fn stats(&self) -> StoreStats {
        let counters = &self.data.counters;
        StoreStats {
            sessions_started: counters.sessions_started.load(Ordering::Relaxed),
            sessions_ended: counters.sessions_ended.load(Ordering::Relaxed),
            open_sessions: self.data.open_sessions(),
            commits: counters.commits.load(Ordering::Relaxed),
            aborts: counters.aborts.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn memory_session(&self, id: Uuid) -> Result<Arc<MemorySession>, StorageError> {
        self.data.session(id)
    }
}

impl Backend for MemoryStore {
    fn start_session(&self, options: &SessionOptions) -> Result<SessionHandle, TxnError> {
        let session = Arc::new(MemorySession::new(self.data.clone(), options.clone()));
        self.data.register_session(&session);
        debug!(session = %session.session_id(), "memory session started");
        Ok(session)
    }
}
