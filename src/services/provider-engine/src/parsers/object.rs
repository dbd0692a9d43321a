use serde_json::Value;

use super::{dictionary, is_object_of_objects};
use crate::mapping::{CompiledMapping, Record};
use crate::path::PathContext;
use crate::utils::JsonUtils;

/// Keys that commonly wrap a single scalar result
const VALUE_WRAPPERS: &[&str] = &["balance", "result", "value", "amount", "data"];

/// Single object; an object of objects whose fields do not resolve is parsed as a dictionary
pub(super) fn parse_object(root: &Value, mapping: &CompiledMapping) -> Vec<Record> {
    let ctx = PathContext {
        value: Some(root),
        ..PathContext::new()
    };
    let record = mapping.record_from(root, &ctx);

    let resolved_any = mapping.has_fields()
        && mapping
            .fields
            .iter()
            .any(|(target, _)| record.contains_key(target));
    if !resolved_any && mapping.has_fields() && is_object_of_objects(root) {
        return dictionary::parse(root, mapping);
    }
    vec![record]
}

/// Scalar, or a known wrapper key around one, as `{ valueField: value }`
pub(super) fn parse_value(root: &Value, mapping: &CompiledMapping) -> Vec<Record> {
    let value_field = mapping
        .config
        .value_field
        .clone()
        .unwrap_or_else(|| "value".to_string());

    let scalar = match root {
        Value::Object(map) => VALUE_WRAPPERS
            .iter()
            .filter_map(|key| map.get(*key))
            .find(|v| JsonUtils::is_primitive(v))
            .cloned(),
        Value::Null => None,
        other => Some(other.clone()),
    };

    let ctx = PathContext {
        value: Some(root),
        ..PathContext::new()
    };
    let mut record = Record::new();
    if let Some(scalar) = scalar {
        record.insert(value_field, scalar);
    }
    vec![mapping.record_with_base(record, root, &ctx)]
}

#[cfg(test)]
mod tests {
    use super::super::tests::compile;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_parser_single_record() {
        let mapping = compile(json!({
            "type": "json_object",
            "fields": { "activationId": "activation.id", "phoneNumber": "activation.phone" }
        }));
        let root = json!({"activation": {"id": 55, "phone": "79990001122"}});
        let records = parse_object(&root, &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["activationId"], json!(55));
    }

    #[test]
    fn test_object_of_objects_reclassified() {
        let mapping = compile(json!({
            "type": "json_object",
            "fields": { "code": "$key", "name": "name" }
        }));
        let root = json!({"ru": {"name": "Russia"}, "kz": {"name": "Kazakhstan"}});
        let records = parse_object(&root, &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["code"], json!("kz"));
    }

    #[test]
    fn test_value_parser_unwraps_wrapper_keys() {
        let mapping = compile(json!({"type": "json_value", "valueField": "balance"}));
        assert_eq!(parse_value(&json!(12.5), &mapping)[0]["balance"], json!(12.5));
        assert_eq!(
            parse_value(&json!({"status": "ok", "balance": "99.10"}), &mapping)[0]["balance"],
            json!("99.10")
        );
        assert!(parse_value(&json!({"other": 1}), &mapping)[0].is_empty());
    }

    #[test]
    fn test_value_parser_with_fields() {
        let mapping = compile(json!({
            "type": "json_value",
            "fields": { "currency": "currency" }
        }));
        let records = parse_value(&json!({"result": 3, "currency": "RUB"}), &mapping);
        assert_eq!(records[0]["value"], json!(3));
        assert_eq!(records[0]["currency"], json!("RUB"));
    }
}
