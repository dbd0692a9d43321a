use serde_json::Value;

use crate::mapping::{CompiledMapping, Record};
use crate::path::PathContext;

/// One record per element; a non-array root is treated as a single element
pub(super) fn parse(root: &Value, mapping: &CompiledMapping) -> Vec<Record> {
    match root {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| mapping.record_from(item, &PathContext::for_index(index, item)))
            .collect(),
        Value::Null => Vec::new(),
        single => vec![mapping.record_from(single, &PathContext::for_index(0, single))],
    }
}
