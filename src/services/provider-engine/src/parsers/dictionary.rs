//! Recursive dictionary parser
//!
//! Walks nested objects such as `country -> service -> {cost, count}` and
//! emits one record per data node. A node is data when one of its keys from
//! the leaf vocabulary holds a primitive. With `providersKey`, a node holding
//! that key fans out into one record per operator entry instead.

use serde_json::{Map, Value};
use tracing::trace;

use crate::mapping::{CompiledMapping, Record};
use crate::path::PathContext;
use crate::utils::JsonUtils;

/// Nesting beyond this is not descended
pub const MAX_DEPTH: usize = 32;

pub(super) fn parse(root: &Value, mapping: &CompiledMapping) -> Vec<Record> {
    let mut records = Vec::new();
    let ctx = PathContext {
        value: Some(root),
        ..PathContext::new()
    };
    descend(root, &ctx, mapping, &mut records);
    records
}

fn descend<'a>(
    node: &'a Value,
    ctx: &PathContext<'a>,
    mapping: &CompiledMapping,
    out: &mut Vec<Record>,
) {
    if ctx.depth > MAX_DEPTH {
        trace!(path = %ctx.path(), "Dictionary depth limit reached");
        return;
    }
    let Value::Object(map) = node else {
        return;
    };

    if let Some(ref providers_key) = mapping.config.providers_key {
        if let Some(providers) = map.get(providers_key) {
            fan_out(providers, ctx, mapping, out);
            return;
        }
    }

    if is_leaf(map, &mapping.leaf_fields) {
        let leaf_ctx = if mapping.config.extract_operators && ctx.depth >= 3 {
            ctx.key
                .as_deref()
                .map(|key| ctx.with_operator(key, node))
                .unwrap_or_else(|| ctx.clone())
        } else {
            ctx.clone()
        };
        if passes_required(node, mapping.config.required_field.as_deref()) {
            out.push(mapping.record_from(node, &leaf_ctx));
        }
        return;
    }

    for (key, child) in map {
        if child.is_object() {
            descend(child, &ctx.child(key, child), mapping, out);
        }
    }
}

/// One record per operator entry under the providers key
fn fan_out<'a>(
    providers: &'a Value,
    ctx: &PathContext<'a>,
    mapping: &CompiledMapping,
    out: &mut Vec<Record>,
) {
    let required = mapping
        .config
        .required_field
        .as_deref()
        .or(if mapping.config.extract_operators {
            Some("provider_id")
        } else {
            None
        });

    let entries: Vec<(String, &Value)> = match providers {
        Value::Object(entries) => entries.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    };

    for (operator_key, entry) in entries {
        if !entry.is_object() || !passes_required(entry, required) {
            trace!(operator = %operator_key, path = %ctx.path(), "Dropping operator entry");
            continue;
        }
        let op_ctx = ctx.with_operator(&operator_key, entry);
        out.push(mapping.record_from(entry, &op_ctx));
    }
}

fn is_leaf(map: &Map<String, Value>, vocabulary: &[String]) -> bool {
    map.iter().any(|(key, value)| {
        JsonUtils::is_primitive(value) && vocabulary.iter().any(|f| f.eq_ignore_ascii_case(key))
    })
}

fn passes_required(entry: &Value, required: Option<&str>) -> bool {
    match required {
        Some(field) => entry.get(field).map(|v| !v.is_null()).unwrap_or(false),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::compile;
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_dictionary_round_trip() {
        let mapping = compile(json!({
            "type": "json_dictionary",
            "fields": {
                "cost": "cost",
                "count": "count",
                "country": "$parentKey",
                "service": "$key"
            }
        }));
        let root = json!({"us": {"wa": {"cost": 10, "count": 5}}});
        let records = parse(&root, &mapping);
        assert_eq!(
            records,
            vec![record(json!({"cost": 10, "count": 5, "country": "us", "service": "wa"}))]
        );
    }

    #[test]
    fn test_operator_fan_out_drops_entries_without_required_field() {
        let mapping = compile(json!({
            "type": "json_dictionary",
            "providersKey": "providers",
            "requiredField": "provider_id",
            "fields": {
                "country": "$parentKey",
                "service": "$key",
                "operator": "$operatorKey",
                "cost": "cost",
                "count": "count"
            }
        }));
        let root = json!({
            "ru": {
                "tg": {
                    "providers": {
                        "11": {"cost": 12.5, "count": 40, "provider_id": 11},
                        "bad": {"cost": 3}
                    }
                }
            }
        });
        let records = parse(&root, &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0],
            record(json!({
                "country": "ru",
                "service": "tg",
                "operator": "11",
                "cost": 12.5,
                "count": 40
            }))
        );
    }

    #[test]
    fn test_extract_operators_defaults_required_field() {
        let mapping = compile(json!({
            "type": "json_dictionary",
            "providersKey": "ops",
            "extractOperators": true,
            "fields": { "operator": "$operatorKey", "cost": "cost" }
        }));
        let root = json!({"ru": {"tg": {"ops": {"a": {"cost": 1, "provider_id": 1}, "b": {"cost": 2}}}}});
        let records = parse(&root, &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["operator"], json!("a"));
    }

    #[test]
    fn test_leaf_operators_without_providers_key() {
        let mapping = compile(json!({
            "type": "json_dictionary",
            "extractOperators": true,
            "fields": {
                "country": "$grandParentKey",
                "service": "$parentKey",
                "operator": "$operatorKey",
                "cost": "cost"
            }
        }));
        let root = json!({"ru": {"tg": {"mts": {"cost": 5}, "beeline": {"cost": 6}}}});
        let records = parse(&root, &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["country"], json!("ru"));
        assert_eq!(records[0]["operator"], json!("mts"));
        assert_eq!(records[1]["operator"], json!("beeline"));
    }

    #[test]
    fn test_custom_leaf_vocabulary() {
        let mapping = compile(json!({
            "type": "json_dictionary",
            "leafFields": ["retail_price"],
            "fields": { "service": "$key", "price": "retail_price" }
        }));
        let root = json!({"tg": {"retail_price": 7}, "wa": {"cost": 1}});
        let records = parse(&root, &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["service"], json!("tg"));
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut root = json!({"cost": 1});
        for i in 0..(MAX_DEPTH + 5) {
            let mut wrapper = Map::new();
            wrapper.insert(format!("k{}", i), root);
            root = Value::Object(wrapper);
        }
        let mapping = compile(json!({"type": "json_dictionary", "fields": {"cost": "cost"}}));
        assert!(parse(&root, &mapping).is_empty());
    }
}
