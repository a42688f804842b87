use bson::oid::ObjectId;
use serde_json::Value;

use crate::core::errors::DocumentValidationError;
use crate::{Document, TxnError};

/// Ensure the document has an `_id`, generating an ObjectId hex string if missing.
pub fn normalize_document(doc: &Document) -> Document {
    let mut normalized = doc.clone();
    if !normalized.contains_key("_id") {
        normalized.insert("_id".to_string(), Value::String(ObjectId::new().to_hex()));
    }
    normalized
}

pub fn validate_is_object(value: &Value) -> Result<&Document, TxnError> {
    value
        .as_object()
        .ok_or_else(|| DocumentValidationError("document must be a JSON object".into()).into())
}

/// Stable key for an `_id` value. Equal JSON values yield equal keys.
pub fn id_key(id: &Value) -> String {
    serde_json::to_string(id).unwrap_or_default()
}

/// Equality-only selector matching. `Null` or an empty object matches everything.
pub fn matches_selector(doc: &Document, selector: &Value) -> bool {
    match selector {
        Value::Null => true,
        Value::Object(filter) => filter.iter().all(|(k, v)| doc.get(k) == Some(v)),
        // A bare scalar selects by `_id`.
        id => doc.get("_id") == Some(id),
    }
}
