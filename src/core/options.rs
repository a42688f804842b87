use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::SessionHandle;
use crate::{Document, TxnError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadConcern {
    Local,
    Majority,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Acknowledgment {
    Nodes(u32),
    Tag(String),
}

impl Acknowledgment {
    pub fn majority() -> Self {
        Acknowledgment::Tag("majority".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WriteConcern {
    pub w: Option<Acknowledgment>,
    pub journal: Option<bool>,
}

/// Options applied when a transaction starts and commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionOptions {
    pub read_concern: Option<ReadConcern>,
    pub write_concern: Option<WriteConcern>,
    pub max_commit_time_ms: Option<u64>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_concern(mut self, concern: ReadConcern) -> Self {
        self.read_concern = Some(concern);
        self
    }

    pub fn write_concern(mut self, concern: WriteConcern) -> Self {
        self.write_concern = Some(concern);
        self
    }

    pub fn max_commit_time(mut self, limit: Duration) -> Self {
        self.max_commit_time_ms = Some(limit.as_millis() as u64);
        self
    }

    pub fn max_commit_duration(&self) -> Option<Duration> {
        self.max_commit_time_ms.map(Duration::from_millis)
    }

    /// Fill unset fields from `defaults`.
    pub fn or(&self, defaults: &TransactionOptions) -> TransactionOptions {
        TransactionOptions {
            read_concern: self.read_concern.or(defaults.read_concern),
            write_concern: self
                .write_concern
                .clone()
                .or_else(|| defaults.write_concern.clone()),
            max_commit_time_ms: self.max_commit_time_ms.or(defaults.max_commit_time_ms),
        }
    }
}

/// Options passed through to session creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
    pub causal_consistency: Option<bool>,
    pub default_transaction_options: Option<TransactionOptions>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn causal_consistency(mut self, enabled: bool) -> Self {
        self.causal_consistency = Some(enabled);
        self
    }

    pub fn default_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.default_transaction_options = Some(options);
        self
    }
}

/// Configuration for `run_in_transaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunInTransactionOptions {
    pub session_options: SessionOptions,
    pub transaction_options: TransactionOptions,
    /// Delegate to the backend's retrying `with_transaction`.
    pub retry: bool,
    /// Block before commit until every tracked callback has finished.
    pub wait_for_callbacks: bool,
    /// Collect callback errors and fail the transaction with them.
    /// Only takes effect together with `wait_for_callbacks`.
    pub catch_callback_errors: bool,
}

impl RunInTransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = options;
        self
    }

    pub fn transaction_options(mut self, options: TransactionOptions) -> Self {
        self.transaction_options = options;
        self
    }

    pub fn retry(mut self, enabled: bool) -> Self {
        self.retry = enabled;
        self
    }

    pub fn wait_for_callbacks(mut self, enabled: bool) -> Self {
        self.wait_for_callbacks = enabled;
        self
    }

    pub fn catch_callback_errors(mut self, enabled: bool) -> Self {
        self.catch_callback_errors = enabled;
        self
    }

    /// Whether callback errors are actually captured for this run.
    pub fn captures_callback_errors(&self) -> bool {
        self.wait_for_callbacks && self.catch_callback_errors
    }

    /// Load options from a JSON object; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, TxnError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn default_slot() -> &'static RwLock<RunInTransactionOptions> {
    static DEFAULTS: OnceLock<RwLock<RunInTransactionOptions>> = OnceLock::new();
    DEFAULTS.get_or_init(|| RwLock::new(RunInTransactionOptions::default()))
}

/// Replace the process-wide default options.
pub fn set_default_options(options: RunInTransactionOptions) {
    *default_slot().write() = options;
}

/// The process-wide default options used when none are given explicitly.
pub fn default_options() -> RunInTransactionOptions {
    default_slot().read().clone()
}

/// Per-call options handed to a data-access operation.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub session: Option<SessionHandle>,
    pub extra: Document,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Merge `{session}` into these options. The given session wins over any existing one.
    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("session", &self.session.as_ref().map(|s| s.id()))
            .field("extra", &self.extra)
            .finish()
    }
}
