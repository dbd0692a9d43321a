//! Plain-text response parsers

use serde_json::Value;

use crate::mapping::{CompiledMapping, Record};
use crate::path::PathContext;

/// Capture groups of `pattern`; `global` collects every match
///
/// Named groups keep their names, numbered groups are keyed by position and
/// renamed through `positionFields` when declared.
pub(super) fn parse_regex(text: &str, mapping: &CompiledMapping) -> Vec<Record> {
    let Some(ref pattern) = mapping.pattern else {
        return Vec::new();
    };
    let names: Vec<Option<&str>> = pattern.capture_names().collect();

    let to_record = |captures: regex::Captures<'_>| {
        let mut base = Record::new();
        for (group, name) in names.iter().enumerate().skip(1) {
            let Some(m) = captures.get(group) else {
                continue;
            };
            let field = match name {
                Some(name) => name.to_string(),
                None => mapping
                    .positions
                    .iter()
                    .find(|(index, _)| *index == group)
                    .map(|(_, field)| field.clone())
                    .unwrap_or_else(|| group.to_string()),
            };
            base.insert(field, Value::String(m.as_str().to_string()));
        }
        base
    };

    let bases: Vec<Record> = if mapping.config.global {
        pattern.captures_iter(text).map(to_record).collect()
    } else {
        pattern.captures(text).map(to_record).into_iter().collect()
    };

    bases
        .into_iter()
        .enumerate()
        .map(|(index, base)| {
            let ctx = PathContext {
                index: Some(index),
                ..PathContext::new()
            };
            mapping.overlay(base, &ctx)
        })
        .collect()
}

/// One record per non-empty line, split by `delimiter` (default `:`)
pub(super) fn parse_lines(text: &str, mapping: &CompiledMapping) -> Vec<Record> {
    let delimiter = mapping.config.delimiter.as_deref().unwrap_or(":");
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let header: Vec<(usize, String)> = if mapping.config.has_header {
        match lines.next() {
            Some(first) => first
                .split(delimiter)
                .map(|c| c.trim().to_string())
                .enumerate()
                .collect(),
            None => return Vec::new(),
        }
    } else {
        mapping.positions.clone()
    };

    lines
        .enumerate()
        .map(|(index, line)| {
            let cells: Vec<&str> = line.split(delimiter).map(str::trim).collect();
            let mut base = Record::new();
            if header.is_empty() {
                for (i, cell) in cells.iter().enumerate() {
                    base.insert(i.to_string(), Value::String(cell.to_string()));
                }
            } else {
                for (column, name) in &header {
                    if let Some(cell) = cells.get(*column) {
                        base.insert(name.clone(), Value::String(cell.to_string()));
                    }
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
    fn test_regex_named_groups() {
        let mapping = compile(json!({
            "type": "text_regex",
            "pattern": "ACCESS_NUMBER:(?P<activationId>\\d+):(?P<phoneNumber>\\d+)"
        }));
        let records = parse_regex("ACCESS_NUMBER:123456:79990001122", &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["activationId"], json!("123456"));
        assert_eq!(records[0]["phoneNumber"], json!("79990001122"));
    }

    #[test]
    fn test_regex_numbered_groups_and_global() {
        let mapping = compile(json!({
            "type": "text_regex",
            "pattern": "(\\w+)=(\\d+)",
            "global": true,
            "positionFields": { "1": "service", "2": "count" },
            "transform": { "count": { "type": "integer" } }
        }));
        let records = parse_regex("tg=10;wa=3", &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["service"], json!("wa"));
        assert_eq!(records[1]["count"], json!(3));
    }

    #[test]
    fn test_regex_no_match() {
        let mapping = compile(json!({"type": "text_regex", "pattern": "^OK:(\\d+)$"}));
        assert!(parse_regex("NO_NUMBERS", &mapping).is_empty());
    }

    #[test]
    fn test_lines_with_position_fields() {
        let mapping = compile(json!({
            "type": "text_lines",
            "delimiter": "|",
            "positionFields": { "0": "code", "1": "name" }
        }));
        let records = parse_lines("ru|Russia\n\nkz|Kazakhstan\n", &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["name"], json!("Kazakhstan"));
    }

    #[test]
    fn test_lines_with_header() {
        let mapping = compile(json!({"type": "text_lines", "delimiter": ",", "hasHeader": true}));
        let records = parse_lines("code,cost\ntg,5", &mapping);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["cost"], json!("5"));
    }
}
