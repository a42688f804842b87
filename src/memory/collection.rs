use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::error;

use super::store::{Dispatcher, StoreData};
use super::update::apply_update;
use super::view::View;
use crate::backend::{RawCollection, Session};
use crate::core::document::{matches_selector, normalize_document, validate_is_object};
use crate::core::errors::{StorageError, StorageErrorKind};
use crate::core::options::CallOptions;
use crate::intercept::{Callback, Operation, Params};
use crate::{Document, TxnError};

/// A collection of a [`MemoryStore`](super::MemoryStore).
///
/// Operations carrying a session join that session's transaction; the rest
/// commit on their own. With a callback, the operation runs on the store's
/// dispatcher and the call returns `Null` immediately.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: String,
    data: Arc<StoreData>,
    dispatcher: Arc<Dispatcher>,
}

impl MemoryCollection {
    pub(crate) fn new(name: &str, data: Arc<StoreData>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            name: name.to_string(),
            data,
            dispatcher,
        }
    }

    /// Committed documents in `_id` order, ignoring every open transaction.
    pub fn committed_documents(&self) -> Vec<Document> {
        self.data
            .collections
            .read()
            .get(&self.name)
            .map(|c| c.docs.values().map(|v| v.doc.clone()).collect())
            .unwrap_or_default()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.data
            .collections
            .read()
            .get(&self.name)
            .map(|c| c.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl RawCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(
        &self,
        operation: Operation,
        params: Params,
        options: Option<CallOptions>,
        callback: Option<Callback>,
    ) -> Result<Value, TxnError> {
        let Some(callback) = callback else {
            return execute(&self.name, &self.data, operation, params, options);
        };

        let name = self.name.clone();
        let data = self.data.clone();
        self.dispatcher.spawn(move || {
            let result = execute(&name, &data, operation, params, options);
            if let Err(err) = callback(result) {
                error!(collection = %name, operation = operation.name(), error = %err, "callback failed");
            }
        });
        Ok(Value::Null)
    }
}

fn execute(
    name: &str,
    data: &StoreData,
    operation: Operation,
    params: Params,
    options: Option<CallOptions>,
) -> Result<Value, TxnError> {
    let options = options.unwrap_or_default();
    let session = match &options.session {
        Some(handle) => Some(data.session(handle.id())?),
        None => None,
    };

    if matches!(
        operation,
        Operation::CreateIndex | Operation::DropIndex | Operation::DropCollection
    ) {
        if session.as_ref().is_some_and(|s| s.in_transaction()) {
            return Err(StorageError::new(
                StorageErrorKind::OperationNotSupportedInTransaction,
                format!("{} cannot run in a multi-document transaction", operation.name()),
            )
            .into());
        }
        return run_ddl(name, data, operation, params);
    }

    let work = |view: &mut View<'_>| run_crud(name, view, operation, params, &options);
    match session {
        Some(session) => session.run(work),
        None => data.autocommit(work),
    }
}

fn run_crud(
    name: &str,
    view: &mut View<'_>,
    operation: Operation,
    params: Params,
    options: &CallOptions,
) -> Result<Value, TxnError> {
    let flag = |key: &str| options.get(key).and_then(Value::as_bool).unwrap_or(false);

    match (operation, params) {
        (Operation::Insert, Params::One(doc)) => {
            let doc = normalize_document(validate_is_object(&doc)?);
            let id = doc.get("_id").cloned().unwrap_or(Value::Null);
            view.insert(name, doc)?;
            Ok(id)
        }
        (Operation::Update, Params::Two(selector, modifier)) => {
            let mut matched = select(view, name, &selector);
            if !flag("multi") {
                matched.truncate(1);
            }
            for doc in &matched {
                view.put(name, apply_update(doc, &modifier));
            }
            Ok(json!(matched.len()))
        }
        (Operation::Upsert, Params::Two(selector, modifier)) => {
            if let Some(doc) = select(view, name, &selector).into_iter().next() {
                view.put(name, apply_update(&doc, &modifier));
                return Ok(json!({"numberAffected": 1}));
            }
            let base = seed_from_selector(&selector);
            let doc = normalize_document(&apply_update(&base, &modifier));
            let id = doc.get("_id").cloned().unwrap_or(Value::Null);
            view.insert(name, doc)?;
            Ok(json!({"numberAffected": 1, "insertedId": id}))
        }
        (Operation::Remove, Params::One(selector)) => {
            let matched = select(view, name, &selector);
            for doc in &matched {
                view.delete(name, doc.get("_id").unwrap_or(&Value::Null));
            }
            Ok(json!(matched.len()))
        }
        (Operation::Find, Params::One(selector)) => {
            let docs = select(view, name, &selector);
            Ok(Value::Array(docs.into_iter().map(Value::Object).collect()))
        }
        (Operation::FindOne, Params::One(selector)) => Ok(select(view, name, &selector)
            .into_iter()
            .next()
            .map_or(Value::Null, Value::Object)),
        (Operation::Count, Params::One(selector)) => {
            Ok(json!(select(view, name, &selector).len()))
        }
        (Operation::Distinct, Params::Two(key, selector)) => {
            let key = key.as_str().ok_or_else(|| TxnError::InvalidArguments {
                operation: operation.name(),
                reason: "distinct key must be a string".to_string(),
            })?;
            let mut seen = HashSet::new();
            let mut values = Vec::new();
            for doc in select(view, name, &selector) {
                if let Some(value) = doc.get(key) {
                    if seen.insert(value.to_string()) {
                        values.push(value.clone());
                    }
                }
            }
            Ok(Value::Array(values))
        }
        (Operation::FindAndModify, Params::Three(selector, sort, modifier)) => {
            let mut matched = select(view, name, &selector);
            sort_documents(&mut matched, &sort);
            let Some(original) = matched.into_iter().next() else {
                return Ok(Value::Null);
            };
            let updated = apply_update(&original, &modifier);
            view.put(name, updated.clone());
            Ok(Value::Object(if flag("new") { updated } else { original }))
        }
        (operation, params) => Err(TxnError::InvalidArguments {
            operation: operation.name(),
            reason: format!("expected {:?} parameters, got {:?}", operation.arity(), params.arity()),
        }),
    }
}

/// Index and collection changes apply immediately; they never join a transaction.
fn run_ddl(
    name: &str,
    data: &StoreData,
    operation: Operation,
    params: Params,
) -> Result<Value, TxnError> {
    let mut collections = data.collections.write();
    match (operation, params) {
        (Operation::CreateIndex, Params::One(keys)) => {
            let index_name = index_name(&keys).ok_or_else(|| TxnError::InvalidArguments {
                operation: operation.name(),
                reason: "index keys must be a field name or a non-empty object".to_string(),
            })?;
            collections
                .entry(name.to_string())
                .or_default()
                .indexes
                .insert(index_name.clone(), keys);
            Ok(Value::String(index_name))
        }
        (Operation::DropIndex, Params::One(index)) => {
            let index = index.as_str().unwrap_or_default();
            let removed = collections
                .get_mut(name)
                .and_then(|c| c.indexes.remove(index));
            if removed.is_none() {
                return Err(StorageError::new(
                    StorageErrorKind::Other,
                    format!("index not found with name [{index}]"),
                )
                .into());
            }
            Ok(Value::Null)
        }
        (Operation::DropCollection, Params::Zero) => {
            Ok(Value::Bool(collections.remove(name).is_some()))
        }
        (operation, params) => Err(TxnError::InvalidArguments {
            operation: operation.name(),
            reason: format!("expected {:?} parameters, got {:?}", operation.arity(), params.arity()),
        }),
    }
}

/// Matching documents in `_id` order.
fn select(view: &mut View<'_>, name: &str, selector: &Value) -> Vec<Document> {
    view.scan(name)
        .into_iter()
        .filter(|doc| matches_selector(doc, selector))
        .collect()
}

fn seed_from_selector(selector: &Value) -> Document {
    match selector {
        Value::Object(fields) => fields
            .iter()
            .filter(|(k, _)| !k.starts_with('$'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Value::Null => Document::new(),
        id => {
            let mut doc = Document::new();
            doc.insert("_id".to_string(), id.clone());
            doc
        }
    }
}

fn index_name(keys: &Value) -> Option<String> {
    match keys {
        Value::String(field) if !field.is_empty() => Some(format!("{field}_1")),
        Value::Object(fields) if !fields.is_empty() => Some(
            fields
                .iter()
                .map(|(field, direction)| format!("{field}_{direction}"))
                .collect::<Vec<_>>()
                .join("_"),
        ),
        _ => None,
    }
}

/// `sort` is `{field: 1 | -1, ...}`; anything else leaves the order alone.
fn sort_documents(docs: &mut [Document], sort: &Value) {
    let Some(keys) = sort.as_object() else {
        return;
    };
    docs.sort_by(|a, b| {
        for (field, direction) in keys {
            let ord = compare_values(a.get(field), b.get(field));
            let ord = if direction.as_i64() == Some(-1) {
                ord.reverse()
            } else {
                ord
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// Missing and null sort first, as in MongoDB.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}
