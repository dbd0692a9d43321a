use serde_json::Value;

use crate::mapping::{CompiledMapping, Record};
use crate::path::PathContext;

/// `{ "<id>": <value or object>, ... }`; each key becomes the record's id
pub(super) fn parse(root: &Value, mapping: &CompiledMapping) -> Vec<Record> {
    let Value::Object(map) = root else {
        return Vec::new();
    };
    let id_field = mapping.config.id_field.as_deref().unwrap_or("id");
    let value_field = mapping.config.value_field.as_deref().unwrap_or("value");

    map.iter()
        .map(|(key, value)| {
            let ctx = PathContext::for_entry(key, value);
            let mut base = Record::new();
            base.insert(id_field.to_string(), Value::String(key.clone()));
            match value {
                Value::Object(entries) if !mapping.has_fields() => {
                    for (k, v) in entries {
                        base.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
                Value::Object(_) => {}
                other => {
                    base.insert(value_field.to_string(), other.clone());
                }
            }
            mapping.record_with_base(base, value, &ctx)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::tests::compile;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyed_primitives() {
        let mapping = compile(json!({
            "type": "json_keyed_value",
            "idField": "code",
            "valueField": "name"
        }));
        let records = parse(&json!({"ru": "Russia", "kz": "Kazakhstan"}), &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["code"], json!("ru"));
        assert_eq!(records[0]["name"], json!("Russia"));
    }

    #[test]
    fn test_keyed_objects_with_fields() {
        let mapping = compile(json!({
            "type": "json_keyed_value",
            "fields": { "name": "title", "code": "$key.$upper" }
        }));
        let records = parse(&json!({"tg": {"title": "Telegram"}}), &mapping);
        assert_eq!(records[0]["id"], json!("tg"));
        assert_eq!(records[0]["code"], json!("TG"));
        assert_eq!(records[0]["name"], json!("Telegram"));
    }

    #[test]
    fn test_keyed_objects_passthrough() {
        let mapping = compile(json!({"type": "json_keyed_value"}));
        let records = parse(&json!({"1": {"cost": 3, "id": "ignored"}}), &mapping);
        assert_eq!(records[0]["id"], json!("1"));
        assert_eq!(records[0]["cost"], json!(3));
    }
}
