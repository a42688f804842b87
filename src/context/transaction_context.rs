use crate::backend::SessionHandle;
use crate::txn::tracker::CallbackTracker;

/// State of one active transaction, shared by everything running inside it.
#[derive(Debug)]
pub struct TransactionContext {
    session: SessionHandle,
    catch_callback_errors: bool,
    tracker: CallbackTracker,
}

impl TransactionContext {
    pub fn new(session: SessionHandle, catch_callback_errors: bool) -> Self {
        Self {
            session,
            catch_callback_errors,
            tracker: CallbackTracker::new(),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn catch_callback_errors(&self) -> bool {
        self.catch_callback_errors
    }

    pub fn tracker(&self) -> &CallbackTracker {
        &self.tracker
    }
}
