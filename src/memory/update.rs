use serde_json::{Number, Value};

use crate::Document;

/// Apply MongoDB-style update operators, or replace the document when the
/// modifier has no `$` keys. `_id` is always preserved.
pub fn apply_update(doc: &Document, update: &Value) -> Document {
    let update_obj = match update.as_object() {
        Some(obj) => obj,
        None => return doc.clone(),
    };

    let is_update_operators = update_obj.keys().any(|k| k.starts_with('$'));

    if !is_update_operators {
        let mut new_doc = update_obj.clone();
        if let Some(id) = doc.get("_id") {
            new_doc.insert("_id".to_string(), id.clone());
        }
        return new_doc;
    }

    let mut new_doc = doc.clone();

    if let Some(Value::Object(set_fields)) = update_obj.get("$set") {
        for (k, v) in set_fields {
            if k != "_id" {
                new_doc.insert(k.clone(), v.clone());
            }
        }
    }

    if let Some(Value::Object(unset_fields)) = update_obj.get("$unset") {
        for k in unset_fields.keys() {
            if k != "_id" {
                new_doc.remove(k);
            }
        }
    }

    if let Some(Value::Object(inc_fields)) = update_obj.get("$inc") {
        for (k, v) in inc_fields {
            let current = new_doc.get(k).cloned().unwrap_or(Value::from(0));
            if let Some(sum) = add_numbers(&current, v) {
                new_doc.insert(k.clone(), sum);
            }
        }
    }

    if let Some(Value::Object(push_fields)) = update_obj.get("$push") {
        for (k, v) in push_fields {
            let arr = new_doc
                .entry(k.clone())
                .or_insert_with(|| Value::Array(vec![]));
            if let Value::Array(ref mut arr_vec) = arr {
                arr_vec.push(v.clone());
            }
        }
    }

    if let Some(Value::Object(pull_fields)) = update_obj.get("$pull") {
        for (k, v) in pull_fields {
            if let Some(Value::Array(arr)) = new_doc.get_mut(k) {
                arr.retain(|item| item != v);
            }
        }
    }

    new_doc
}

/// Integer addition when both sides are integers, float otherwise.
fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(Value::from(x.checked_add(y)?));
    }
    let sum = a.as_f64()? + b.as_f64()?;
    Number::from_f64(sum).map(Value::Number)
}
