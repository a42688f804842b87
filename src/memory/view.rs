use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::store::{StoreData, Versioned};
use crate::core::document::id_key;
use crate::core::errors::{StorageError, StorageErrorKind};
use crate::Document;

type DocKey = (String, String);

/// Buffered writes of one transaction, plus the committed version of every
/// document it has touched.
#[derive(Debug, Default)]
pub(crate) struct TxnState {
    /// `None` marks a delete.
    pub writes: BTreeMap<DocKey, Option<Document>>,
    observed: HashMap<DocKey, u64>,
}

impl TxnState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed_version(&self, collection: &str, key: &str) -> u64 {
        self.observed
            .get(&(collection.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Committed state overlaid with one transaction's own writes.
pub(crate) struct View<'a> {
    data: &'a StoreData,
    txn: &'a mut TxnState,
}

impl<'a> View<'a> {
    pub fn new(data: &'a StoreData, txn: &'a mut TxnState) -> Self {
        Self { data, txn }
    }

    /// Record the committed version a document had when first seen.
    fn observe(&mut self, collection: &str, key: &str, version: u64) {
        self.txn
            .observed
            .entry((collection.to_string(), key.to_string()))
            .or_insert(version);
    }

    fn touch(&mut self, collection: &str, key: &str) {
        let version = self.data.committed_version(collection, key);
        self.observe(collection, key, version);
    }

    pub fn get(&mut self, collection: &str, id: &Value) -> Option<Document> {
        let key = id_key(id);
        let committed = self
            .data
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.docs.get(&key))
            .cloned();
        self.observe(collection, &key, committed.as_ref().map_or(0, |v| v.version));

        if let Some(write) = self.txn.writes.get(&(collection.to_string(), key)) {
            return write.clone();
        }
        committed.map(|v| v.doc)
    }

    /// Every visible document of `collection`, ordered by `_id` key.
    pub fn scan(&mut self, collection: &str) -> Vec<Document> {
        // Documents and versions are read under one lock so a concurrent
        // commit cannot slip between them.
        let committed: Vec<(String, Versioned)> = self
            .data
            .collections
            .read()
            .get(collection)
            .map(|c| c.docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let mut merged = BTreeMap::new();
        for (key, versioned) in committed {
            self.observe(collection, &key, versioned.version);
            merged.insert(key, versioned.doc);
        }

        for ((coll, key), write) in &self.txn.writes {
            if coll != collection {
                continue;
            }
            match write {
                Some(doc) => {
                    merged.insert(key.clone(), doc.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_values().collect()
    }

    pub fn insert(&mut self, collection: &str, doc: Document) -> Result<(), StorageError> {
        let id = doc.get("_id").cloned().unwrap_or(Value::Null);
        if self.get(collection, &id).is_some() {
            return Err(StorageError::new(
                StorageErrorKind::DuplicateKey,
                format!("duplicate _id {id} in {collection}"),
            ));
        }
        self.put(collection, doc);
        Ok(())
    }

    pub fn put(&mut self, collection: &str, doc: Document) {
        let key = id_key(doc.get("_id").unwrap_or(&Value::Null));
        self.touch(collection, &key);
        self.txn
            .writes
            .insert((collection.to_string(), key), Some(doc));
    }

    pub fn delete(&mut self, collection: &str, id: &Value) {
        let key = id_key(id);
        self.touch(collection, &key);
        self.txn.writes.insert((collection.to_string(), key), None);
    }
}
