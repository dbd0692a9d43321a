//! Structural parsers
//!
//! Each response shape has a strategy that flattens the payload into
//! [`Record`]s. [`parse`] descends into the mapping's root path, corrects the
//! declared shape against the actual payload and dispatches.

mod array;
mod auto;
mod dictionary;
mod keyed;
mod object;
mod positional;
mod text;

pub use auto::auto_parse;

use numgate_shared::ResponseShape;
use serde_json::Value;
use tracing::debug;

use crate::mapping::{CompiledMapping, Record};
use crate::path::PathContext;

/// A decoded response body: JSON when it parses, always the trimmed text
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub text: String,
    pub json: Option<Value>,
}

impl Payload {
    pub fn decode(raw: &str) -> Self {
        let text = raw.trim().trim_start_matches('\u{feff}').to_string();
        let json = serde_json::from_str::<Value>(&text).ok();
        Self { text, json }
    }

    /// JSON value, or the text as a JSON string
    pub fn value(&self) -> Value {
        self.json
            .clone()
            .unwrap_or_else(|| Value::String(self.text.clone()))
    }

    pub fn is_json(&self) -> bool {
        self.json.is_some()
    }
}

/// Parse a payload with a compiled mapping
pub fn parse(payload: &Payload, mapping: &CompiledMapping) -> Vec<Record> {
    let declared = mapping.config.shape;
    if declared.is_text() {
        return match declared {
            ResponseShape::TextRegex => text::parse_regex(&payload.text, mapping),
            _ => text::parse_lines(&payload.text, mapping),
        };
    }

    let value = payload.value();
    let root = match mapping.root_path {
        Some(ref path) if !path.is_identity() => match path.evaluate(&value, &PathContext::new()) {
            Some(inner) => inner,
            None => {
                debug!(root_path = %path, "Root path not found in response");
                return Vec::new();
            }
        },
        _ => value,
    };

    let shape = effective_shape(declared, &root);
    if shape != declared {
        debug!(?declared, effective = ?shape, "Response shape auto-corrected");
    }

    let records = match shape {
        ResponseShape::JsonArray => array::parse(&root, mapping),
        ResponseShape::JsonDictionary => dictionary::parse(&root, mapping),
        ResponseShape::JsonObject => object::parse_object(&root, mapping),
        ResponseShape::JsonValue => object::parse_value(&root, mapping),
        ResponseShape::JsonArrayPositional => positional::parse_positional(&root, mapping),
        ResponseShape::JsonNestedArray => positional::parse_table(&root, mapping),
        ResponseShape::JsonKeyedValue => keyed::parse(&root, mapping),
        ResponseShape::TextRegex | ResponseShape::TextLines => Vec::new(),
    };

    records.into_iter().filter(|r| !r.is_empty()).collect()
}

/// Structurally correct shape for a declared one
pub fn effective_shape(declared: ResponseShape, root: &Value) -> ResponseShape {
    match (declared, root) {
        (ResponseShape::JsonObject | ResponseShape::JsonValue, Value::Array(_)) => {
            ResponseShape::JsonArray
        }
        (ResponseShape::JsonValue, value) if is_object_of_objects(value) => {
            ResponseShape::JsonDictionary
        }
        _ => declared,
    }
}

pub(crate) fn is_object_of_objects(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.values().all(Value::is_object),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numgate_shared::MappingConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    pub(crate) fn compile(value: Value) -> CompiledMapping {
        let config: MappingConfig = serde_json::from_value(value).unwrap();
        CompiledMapping::compile(&config).unwrap()
    }

    #[test]
    fn test_payload_decoding() {
        let json = Payload::decode(" {\"a\":1} ");
        assert!(json.is_json());
        assert_eq!(json.value(), json!({"a": 1}));

        let text = Payload::decode("ACCESS_NUMBER:1:79990001122\n");
        assert!(!text.is_json());
        assert_eq!(text.value(), json!("ACCESS_NUMBER:1:79990001122"));

        let number = Payload::decode("12.5");
        assert_eq!(number.json, Some(json!(12.5)));
    }

    #[test]
    fn test_shape_auto_correction() {
        assert_eq!(
            effective_shape(ResponseShape::JsonObject, &json!([1])),
            ResponseShape::JsonArray
        );
        assert_eq!(
            effective_shape(ResponseShape::JsonValue, &json!({"a": {"x": 1}})),
            ResponseShape::JsonDictionary
        );
        assert_eq!(
            effective_shape(ResponseShape::JsonValue, &json!({"balance": 1})),
            ResponseShape::JsonValue
        );
        assert_eq!(
            effective_shape(ResponseShape::JsonKeyedValue, &json!([1])),
            ResponseShape::JsonKeyedValue
        );
    }

    #[test]
    fn test_declared_object_receiving_object_of_objects() {
        // Dictionary unless the mapped fields resolve on the outer object
        assert_eq!(
            effective_shape(ResponseShape::JsonObject, &json!({"ru": {"name": "Russia"}})),
            ResponseShape::JsonObject
        );

        let catalog = compile(json!({
            "type": "json_object",
            "fields": { "code": "$key", "name": "name" }
        }));
        let records = parse(
            &Payload::decode(r#"{"ru":{"name":"Russia"},"kz":{"name":"Kazakhstan"}}"#),
            &catalog,
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["code"], json!("ru"));
        assert_eq!(records[1]["name"], json!("Kazakhstan"));

        let activation = compile(json!({
            "type": "json_object",
            "fields": { "activationId": "activation.id", "phoneNumber": "activation.phone" }
        }));
        let records = parse(
            &Payload::decode(r#"{"activation":{"id":7,"phone":"79990001122"},"meta":{"v":2}}"#),
            &activation,
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["activationId"], json!(7));
        assert_eq!(records[0]["phoneNumber"], json!("79990001122"));
    }

    #[test]
    fn test_declared_object_receiving_array() {
        let mapping = compile(json!({
            "type": "json_object",
            "fields": { "id": "id" }
        }));
        let records = parse(&Payload::decode(r#"[{"id":1},{"id":2}]"#), &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["id"], json!(2));
    }

    #[test]
    fn test_root_path_descends_before_parsing() {
        let mapping = compile(json!({
            "type": "json_array",
            "rootPath": "data.countries",
            "fields": { "id": "id" }
        }));
        let payload = Payload::decode(r#"{"data":{"countries":[{"id":"ru"}]}}"#);
        let records = parse(&payload, &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], json!("ru"));

        let missing = Payload::decode(r#"{"data":{}}"#);
        assert!(parse(&missing, &mapping).is_empty());
    }
}
