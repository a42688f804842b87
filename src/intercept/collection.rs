use std::collections::HashMap;

use serde_json::Value;

use super::args::{split_args, Arg, Callback};
use super::operation::{Operation, Params};
use crate::backend::RawCollection;
use crate::context::slot;
use crate::core::errors::StorageError;
use crate::core::options::CallOptions;
use crate::txn::tracker::wrap_callback;
use crate::{Document, TxnError};

/// A data-access surface whose every operation joins the ambient transaction.
///
/// Outside a transaction calls are forwarded untouched. Inside one, the
/// session is merged into the call's options (synthesizing them if absent)
/// and a supplied callback is wrapped for completion tracking.
#[derive(Debug)]
pub struct InterceptedCollection<C> {
    raw: C,
    operations: HashMap<&'static str, Operation>,
}

/// Wrap `raw` once; the operation table is fixed at this point.
pub fn intercept<C: RawCollection>(raw: C) -> InterceptedCollection<C> {
    InterceptedCollection::new(raw)
}

impl<C: RawCollection> InterceptedCollection<C> {
    pub fn new(raw: C) -> Self {
        let operations = Operation::ALL.into_iter().map(|op| (op.name(), op)).collect();
        Self { raw, operations }
    }

    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub fn raw(&self) -> &C {
        &self.raw
    }

    /// Dispatch by operation name with loosely shaped arguments.
    pub fn call(&self, name: &str, args: Vec<Arg>) -> Result<Value, TxnError> {
        let op = *self
            .operations
            .get(name)
            .ok_or_else(|| TxnError::UnknownOperation(name.to_string()))?;
        let split = split_args(op, args)?;
        self.invoke(op, split.params, split.options, split.callback)
    }

    /// Typed entry point shared by every helper below.
    pub fn invoke(
        &self,
        op: Operation,
        params: Params,
        options: Option<CallOptions>,
        callback: Option<Callback>,
    ) -> Result<Value, TxnError> {
        if params.arity() != op.arity() {
            return Err(TxnError::InvalidArguments {
                operation: op.name(),
                reason: format!("expected {:?} parameters, got {:?}", op.arity(), params.arity()),
            });
        }
        if callback.is_some() && !op.accepts_callback() {
            return Err(TxnError::InvalidArguments {
                operation: op.name(),
                reason: "operation does not accept a callback".to_string(),
            });
        }

        let Some(context) = slot::current() else {
            return self.raw.call(op, params, options, callback);
        };
        let options = options
            .unwrap_or_default()
            .with_session(context.session().clone());
        let callback = callback.map(wrap_callback);
        self.raw.call(op, params, Some(options), callback)
    }

    /// Insert `doc`, returning its `_id`.
    pub fn insert(&self, doc: Value, options: Option<CallOptions>) -> Result<Value, TxnError> {
        self.invoke(Operation::Insert, Params::One(doc), options, None)
    }

    /// Apply `modifier` to matching documents, returning how many were modified.
    pub fn update(
        &self,
        selector: Value,
        modifier: Value,
        options: Option<CallOptions>,
    ) -> Result<u64, TxnError> {
        let result = self.invoke(Operation::Update, Params::Two(selector, modifier), options, None)?;
        as_count(Operation::Update, result)
    }

    /// Update or insert; returns `{"numberAffected": n, "insertedId": id?}`.
    pub fn upsert(
        &self,
        selector: Value,
        modifier: Value,
        options: Option<CallOptions>,
    ) -> Result<Value, TxnError> {
        self.invoke(Operation::Upsert, Params::Two(selector, modifier), options, None)
    }

    pub fn remove(&self, selector: Value, options: Option<CallOptions>) -> Result<u64, TxnError> {
        let result = self.invoke(Operation::Remove, Params::One(selector), options, None)?;
        as_count(Operation::Remove, result)
    }

    pub fn find(
        &self,
        selector: Value,
        options: Option<CallOptions>,
    ) -> Result<Vec<Document>, TxnError> {
        let result = self.invoke(Operation::Find, Params::One(selector), options, None)?;
        Ok(serde_json::from_value(result)?)
    }

    pub fn find_one(
        &self,
        selector: Value,
        options: Option<CallOptions>,
    ) -> Result<Option<Document>, TxnError> {
        let result = self.invoke(Operation::FindOne, Params::One(selector), options, None)?;
        Ok(serde_json::from_value(result)?)
    }

    pub fn count(&self, selector: Value, options: Option<CallOptions>) -> Result<u64, TxnError> {
        let result = self.invoke(Operation::Count, Params::One(selector), options, None)?;
        as_count(Operation::Count, result)
    }

    pub fn distinct(
        &self,
        key: &str,
        selector: Value,
        options: Option<CallOptions>,
    ) -> Result<Vec<Value>, TxnError> {
        let params = Params::Two(Value::String(key.to_string()), selector);
        let result = self.invoke(Operation::Distinct, params, options, None)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Modify the first match in `sort` order, returning the document as it was before.
    pub fn find_and_modify(
        &self,
        selector: Value,
        sort: Value,
        modifier: Value,
        options: Option<CallOptions>,
    ) -> Result<Option<Document>, TxnError> {
        let params = Params::Three(selector, sort, modifier);
        let result = self.invoke(Operation::FindAndModify, params, options, None)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Returns the index name.
    pub fn create_index(&self, keys: Value, options: Option<CallOptions>) -> Result<String, TxnError> {
        let result = self.invoke(Operation::CreateIndex, Params::One(keys), options, None)?;
        Ok(serde_json::from_value(result)?)
    }

    pub fn drop_index(&self, name: &str, options: Option<CallOptions>) -> Result<(), TxnError> {
        let params = Params::One(Value::String(name.to_string()));
        self.invoke(Operation::DropIndex, params, options, None)?;
        Ok(())
    }

    pub fn drop_collection(&self, options: Option<CallOptions>) -> Result<(), TxnError> {
        self.invoke(Operation::DropCollection, Params::Zero, options, None)?;
        Ok(())
    }
}

fn as_count(op: Operation, value: Value) -> Result<u64, TxnError> {
    value.as_u64().ok_or_else(|| {
        StorageError::other(format!("{} returned a non-count result: {value}", op.name())).into()
    })
}
