use serde_json::Value;

use tracing::debug;

use crate::mapping::{CompiledMapping, Record};
use crate::path::PathContext;
use crate::utils::JsonUtils;

/// `[id, phone, cost]` or `[[id, phone, cost], ...]`, columns named by index
///
/// Only an array made entirely of arrays is read as rows. Anything else is a
/// single row, so array-valued cells stay in place.
pub(super) fn parse_positional(root: &Value, mapping: &CompiledMapping) -> Vec<Record> {
    let Value::Array(items) = root else {
        return Vec::new();
    };
    let row_count = items.iter().filter(|item| item.is_array()).count();
    let rows: Vec<&Vec<Value>> = if row_count > 0 && row_count == items.len() {
        items.iter().filter_map(Value::as_array).collect()
    } else {
        if row_count > 0 {
            debug!(row_count, cells = items.len(), "Mixed positional array read as one row");
        }
        vec![items]
    };

    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let mut base = Record::new();
            for (column, name) in &mapping.positions {
                if let Some(cell) = row.get(*column) {
                    base.insert(name.clone(), cell.clone());
                }
            }
            let ctx = PathContext {
                index: Some(index),
                ..PathContext::new()
            };
            mapping.overlay(base, &ctx)
        })
        .collect()
}

/// 2-D array with a header row or columns named by `positionFields`
pub(super) fn parse_table(root: &Value, mapping: &CompiledMapping) -> Vec<Record> {
    let Value::Array(items) = root else {
        return Vec::new();
    };
    let rows: Vec<&Vec<Value>> = items.iter().filter_map(Value::as_array).collect();
    let (header, body): (Vec<(usize, String)>, &[&Vec<Value>]) = if mapping.config.has_header {
        match rows.split_first() {
            Some((first, rest)) => (
                first
                    .iter()
                    .enumerate()
                    .filter_map(|(i, cell)| JsonUtils::to_plain_string(cell).map(|name| (i, name)))
                    .collect(),
                rest,
            ),
            None => return Vec::new(),
        }
    } else if mapping.positions.is_empty() {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        ((0..width).map(|i| (i, i.to_string())).collect(), &rows[..])
    } else {
        (mapping.positions.clone(), &rows[..])
    };

    body.iter()
        .enumerate()
        .map(|(index, row)| {
            let mut base = Record::new();
            for (column, name) in &header {
                if let Some(cell) = row.get(*column) {
                    base.insert(name.clone(), cell.clone());
                }
            }
            let ctx = PathContext {
                index: Some(index),
                ..PathContext::new()
            };
            mapping.overlay(base, &ctx)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::tests::compile;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_positional_row() {
        let mapping = compile(json!({
            "type": "json_array_positional",
            "positionFields": { "0": "activationId", "1": "phoneNumber" }
        }));
        let records = parse_positional(&json!([123, "79990001122"]), &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["activationId"], json!(123));
        assert_eq!(records[0]["phoneNumber"], json!("79990001122"));
    }

    #[test]
    fn test_positional_rows_with_named_fields() {
        let mapping = compile(json!({
            "type": "json_array_positional",
            "fields": { "0": "code", "1": "name", "label": "name.$upper" }
        }));
        let records = parse_positional(&json!([["ru", "Russia"], ["kz", "Kazakhstan"]]), &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["code"], json!("kz"));
        assert_eq!(records[1]["label"], json!("KAZAKHSTAN"));
    }

    #[test]
    fn test_mixed_positional_array_is_one_row() {
        let mapping = compile(json!({
            "type": "json_array_positional",
            "positionFields": { "0": "activationId", "1": "phoneNumber", "2": "tags" }
        }));
        let records = parse_positional(&json!([123, "79990001122", ["sms", "voice"]]), &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["activationId"], json!(123));
        assert_eq!(records[0]["phoneNumber"], json!("79990001122"));
        assert_eq!(records[0]["tags"], json!(["sms", "voice"]));
    }

    #[test]
    fn test_table_with_header_row() {
        let mapping = compile(json!({"type": "json_nested_array", "hasHeader": true}));
        let root = json!([["country", "service", "cost"], ["ru", "tg", 10], ["kz", "wa", 4]]);
        let records = parse_table(&root, &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["country"], json!("ru"));
        assert_eq!(records[1]["cost"], json!(4));
    }

    #[test]
    fn test_table_with_position_fields() {
        let mapping = compile(json!({
            "type": "json_nested_array",
            "positionFields": { "0": "country", "2": "cost" }
        }));
        let records = parse_table(&json!([["ru", "tg", 10]]), &mapping);
        assert_eq!(records[0].len(), 2);
        assert_eq!(records[0]["cost"], json!(10));
    }
}
