use std::fmt;

use crate::TxnError;

/// Message used when the first captured error carries no message of its own.
pub const CALLBACK_ERROR_FALLBACK: &str = "error in transaction callback";

/// Errors captured from transaction callbacks, surfaced as one failure.
///
/// Displays as the first captured error; [`CallbackErrors::errors`] keeps all of
/// them in the order they occurred.
#[derive(Debug)]
pub struct CallbackErrors {
    message: String,
    errors: Vec<TxnError>,
}

impl CallbackErrors {
    /// Returns `None` for an empty list: there is nothing to report.
    pub fn new(errors: Vec<TxnError>) -> Option<Self> {
        let first = errors.first()?;
        let message = first
            .message()
            .unwrap_or_else(|| CALLBACK_ERROR_FALLBACK.to_string());
        Some(Self { message, errors })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn errors(&self) -> &[TxnError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for CallbackErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CallbackErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
