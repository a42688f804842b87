use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::StoreData;
use super::view::{TxnState, View};
use crate::backend::{Session, TransactionBody};
use crate::core::errors::{StorageError, StorageErrorKind};
use crate::core::options::{SessionOptions, TransactionOptions};
use crate::TxnError;

/// Total time `with_transaction` keeps retrying, matching the MongoDB drivers.
pub const WITH_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
struct SessionState {
    txn: Option<TxnState>,
    ended: bool,
}

#[derive(Debug)]
pub struct MemorySession {
    id: Uuid,
    options: SessionOptions,
    data: Arc<StoreData>,
    state: Mutex<SessionState>,
}

impl MemorySession {
    pub(crate) fn new(data: Arc<StoreData>, options: SessionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            data,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub(crate) fn session_id(&self) -> Uuid {
        self.id
    }

    /// Run `op` against this session's transaction, or as a single-operation
    /// write if no transaction is active.
    pub(crate) fn run<R>(
        &self,
        op: impl FnOnce(&mut View<'_>) -> Result<R, TxnError>,
    ) -> Result<R, TxnError> {
        let mut state = self.state.lock();
        check_open(&state)?;
        if let Some(txn) = state.txn.as_mut() {
            return op(&mut View::new(&self.data, txn));
        }
        drop(state);
        self.data.autocommit(op)
    }

    fn discard(&self, state: &mut SessionState) -> bool {
        if state.txn.take().is_some() {
            self.data.counters.aborts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

fn check_open(state: &SessionState) -> Result<(), StorageError> {
    if state.ended {
        return Err(StorageError::new(
            StorageErrorKind::SessionEnded,
            "session has already ended",
        ));
    }
    Ok(())
}

impl Session for MemorySession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn start_transaction(&self, options: &TransactionOptions) -> Result<(), TxnError> {
        let mut state = self.state.lock();
        check_open(&state)?;
        if state.txn.is_some() {
            return Err(StorageError::new(
                StorageErrorKind::TransactionAlreadyActive,
                "transaction already in progress",
            )
            .into());
        }
        let options = match &self.options.default_transaction_options {
            Some(defaults) => options.or(defaults),
            None => options.clone(),
        };
        debug!(session = %self.id, ?options, "memory transaction started");
        state.txn = Some(TxnState::new());
        Ok(())
    }

    fn commit_transaction(&self) -> Result<(), TxnError> {
        let mut state = self.state.lock();
        check_open(&state)?;
        let txn = state.txn.take().ok_or_else(|| {
            StorageError::new(StorageErrorKind::NoTransaction, "no transaction to commit")
        })?;

        if let Some(kind) = self.data.next_commit_fault() {
            if kind == StorageErrorKind::UnknownCommitResult {
                // Outcome unknown: the transaction stays open so the commit can be retried.
                state.txn = Some(txn);
            } else {
                self.data.counters.aborts.fetch_add(1, Ordering::Relaxed);
            }
            return Err(StorageError::new(kind, "injected commit failure").into());
        }

        match self.data.commit(&txn) {
            Ok(()) => {
                self.data.counters.commits.fetch_add(1, Ordering::Relaxed);
                debug!(session = %self.id, writes = txn.writes.len(), "memory transaction committed");
                Ok(())
            }
            Err(err) => {
                self.data.counters.aborts.fetch_add(1, Ordering::Relaxed);
                Err(err.into())
            }
        }
    }

    fn abort_transaction(&self) -> Result<(), TxnError> {
        let mut state = self.state.lock();
        check_open(&state)?;
        if !self.discard(&mut state) {
            return Err(StorageError::new(StorageErrorKind::NoTransaction, "no transaction to abort").into());
        }
        debug!(session = %self.id, "memory transaction aborted");
        Ok(())
    }

    fn end_session(&self) -> Result<(), TxnError> {
        let mut state = self.state.lock();
        if state.ended {
            return Ok(());
        }
        if self.discard(&mut state) {
            debug!(session = %self.id, "open transaction aborted by end_session");
        }
        state.ended = true;
        drop(state);
        self.data.unregister_session(self.id);
        Ok(())
    }

    fn with_transaction(
        &self,
        body: &mut TransactionBody<'_>,
        options: &TransactionOptions,
    ) -> Result<(), TxnError> {
        let deadline = Instant::now() + WITH_TRANSACTION_TIMEOUT;

        'attempt: loop {
            self.start_transaction(options)?;

            if let Err(err) = body() {
                if self.in_transaction() {
                    if let Err(abort_err) = self.abort_transaction() {
                        warn!(session = %self.id, error = %abort_err, "abort after failed body");
                    }
                }
                if err.is_transient() && Instant::now() < deadline {
                    debug!(session = %self.id, error = %err, "transient error, retrying transaction");
                    continue 'attempt;
                }
                return Err(err);
            }

            if !self.in_transaction() {
                // The body closed the transaction itself.
                return Ok(());
            }

            loop {
                match self.commit_transaction() {
                    Ok(()) => return Ok(()),
                    Err(err) if err.is_unknown_commit_result() && Instant::now() < deadline => {
                        debug!(session = %self.id, "unknown commit result, retrying commit");
                    }
                    Err(err) if err.is_transient() && Instant::now() < deadline => {
                        debug!(session = %self.id, error = %err, "transient commit error, retrying transaction");
                        continue 'attempt;
                    }
                    Err(err) => {
                        if self.in_transaction() {
                            if let Err(abort_err) = self.abort_transaction() {
                                warn!(session = %self.id, error = %abort_err, "abort after failed commit");
                            }
                        }
                        return Err(err);
                    }
                }
            }
        }
    }

    fn in_transaction(&self) -> bool {
        let state = self.state.lock();
        !state.ended && state.txn.is_some()
    }

    fn has_ended(&self) -> bool {
        self.state.lock().ended
    }
}
