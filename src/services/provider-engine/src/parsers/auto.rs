//! Best-effort parsing for endpoints without a mapping
//!
//! Used while a provider is being configured so responses stay observable.
//! Never relied on for production correctness.

use serde_json::Value;
use tracing::warn;

use super::Payload;
use crate::mapping::Record;
use crate::utils::JsonUtils;

const WRAPPER_KEYS: &[&str] = &["data", "result", "items", "list", "response", "results", "rows"];

/// Unwrap common envelopes and return whatever records can be recognized
pub fn auto_parse(payload: &Payload) -> Vec<Record> {
    warn!("No mapping configured, falling back to heuristic parsing");

    let Some(ref json) = payload.json else {
        return if payload.text.is_empty() {
            Vec::new()
        } else {
            vec![single("value", Value::String(payload.text.clone()))]
        };
    };

    let mut current = json;
    // Bounded so a self-similar envelope cannot loop forever
    for _ in 0..8 {
        let next = match current {
            Value::Object(map) => WRAPPER_KEYS
                .iter()
                .filter_map(|key| map.get(*key))
                .find(|v| v.is_array() || v.is_object()),
            _ => None,
        };
        match next {
            Some(inner) => current = inner,
            None => break,
        }
    }

    match current {
        Value::Array(items) => items.iter().map(to_record).collect(),
        Value::Object(map) if super::is_object_of_objects(current) => map
            .iter()
            .map(|(key, value)| {
                let mut record = single("id", Value::String(key.clone()));
                if let Value::Object(entries) = value {
                    for (k, v) in entries {
                        record.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
                record
            })
            .collect(),
        Value::Object(map) => vec![map
            .iter()
            .filter(|(_, v)| JsonUtils::is_primitive(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()],
        Value::Null => Vec::new(),
        scalar => vec![single("value", scalar.clone())],
    }
}

fn to_record(item: &Value) -> Record {
    match item {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        other => single("value", other.clone()),
    }
}

fn single(key: &str, value: Value) -> Record {
    let mut record = Record::new();
    record.insert(key.to_string(), value);
    record
}
