use std::fmt;

use thiserror::Error;

use crate::txn::aggregate::CallbackErrors;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("nested transactions are not supported")]
    NestedTransaction,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Callback(#[from] CallbackErrors),

    #[error("callback panicked: {}", .message.as_deref().unwrap_or("<non-string payload>"))]
    CallbackPanic { message: Option<String> },

    #[error("{operation} accepts at most {max} arguments, got {got}")]
    ArgumentCount {
        operation: &'static str,
        max: usize,
        got: usize,
    },

    #[error("invalid arguments for {operation}: {reason}")]
    InvalidArguments {
        operation: &'static str,
        reason: String,
    },

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("document validation error: {0}")]
    DocumentValidation(#[from] DocumentValidationError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transaction body completed without producing a result")]
    NoResult,

    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl TxnError {
    /// Build an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        TxnError::Custom(message.into().into())
    }

    /// Backend errors that the retrying strategy may re-run the whole transaction for.
    pub fn is_transient(&self) -> bool {
        matches!(self, TxnError::Storage(e) if e.is_transient())
    }

    pub fn is_unknown_commit_result(&self) -> bool {
        matches!(self, TxnError::Storage(e) if e.is_unknown_commit_result())
    }

    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            TxnError::Storage(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Human-readable message, if the error carries one.
    ///
    /// Panics with a non-string payload are the only errors without a message.
    pub fn message(&self) -> Option<String> {
        match self {
            TxnError::CallbackPanic { message } => message.clone(),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DocumentValidationError(pub String);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageErrorKind {
    WriteConflict,
    UnknownCommitResult,
    DuplicateKey,
    NoTransaction,
    TransactionAlreadyActive,
    SessionEnded,
    OperationNotSupportedInTransaction,
    Other,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageErrorKind::WriteConflict => "write conflict",
            StorageErrorKind::UnknownCommitResult => "unknown commit result",
            StorageErrorKind::DuplicateKey => "duplicate key",
            StorageErrorKind::NoTransaction => "no transaction",
            StorageErrorKind::TransactionAlreadyActive => "transaction already active",
            StorageErrorKind::SessionEnded => "session ended",
            StorageErrorKind::OperationNotSupportedInTransaction => {
                "operation not supported in transaction"
            }
            StorageErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Other, message)
    }

    /// Equivalent of the `TransientTransactionError` label.
    pub fn is_transient(&self) -> bool {
        self.kind == StorageErrorKind::WriteConflict
    }

    /// Equivalent of the `UnknownTransactionCommitResult` label.
    pub fn is_unknown_commit_result(&self) -> bool {
        self.kind == StorageErrorKind::UnknownCommitResult
    }
}
