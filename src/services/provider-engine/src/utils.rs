//! Utility functions for the provider engine
//!
//! String masking, loose JSON value conversions and digit extraction shared by
//! the evaluator, parsers, executor and webhook handling.

use indexmap::IndexMap;
use serde_json::Value;

/// Header names whose values are credentials
const SENSITIVE_HEADER_MARKERS: &[&str] = &[
    "authorization",
    "api-key",
    "apikey",
    "x-api-key",
    "token",
    "secret",
    "key",
];

/// String utility functions
pub struct StringUtils;

impl StringUtils {
    /// Keep `visible_chars` at each end, `****` for short values
    pub fn mask_sensitive(s: &str, visible_chars: usize) -> String {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() <= visible_chars * 2 {
            return "****".to_string();
        }
        let head: String = chars[..visible_chars].iter().collect();
        let tail: String = chars[chars.len() - visible_chars..].iter().collect();
        format!("{}...{}", head, tail)
    }

    /// Whether a header name looks like it carries a credential
    pub fn is_sensitive_header(name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        SENSITIVE_HEADER_MARKERS
            .iter()
            .any(|marker| lower == *marker || lower.contains(marker))
    }

    /// Copy of `headers` with credential values reduced to a preview
    pub fn mask_headers(headers: &IndexMap<String, String>) -> IndexMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let value = if Self::is_sensitive_header(name) {
                    Self::mask_sensitive(value, 4)
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Truncate a string to a maximum number of characters
    pub fn truncate(s: &str, max_chars: usize) -> String {
        match s.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &s[..idx]),
            None => s.to_string(),
        }
    }

    /// First run of ASCII digits whose length lies in `min..=max`
    pub fn first_digit_run(text: &str, min: usize, max: usize) -> Option<String> {
        let mut current = String::new();
        for c in text.chars().chain(std::iter::once(' ')) {
            if c.is_ascii_digit() {
                current.push(c);
                continue;
            }
            if (min..=max).contains(&current.len()) {
                return Some(current);
            }
            current.clear();
        }
        None
    }
}

/// JSON utility functions
pub struct JsonUtils;

impl JsonUtils {
    /// Plain text form of a scalar; strings are not quoted
    pub fn to_plain_string(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Numeric value of a number or a numeric string
    pub fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
        .filter(|n| n.is_finite())
    }

    /// Loose truthiness: empty strings, zero, false, null and empty collections are falsy
    pub fn is_truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    /// Null, empty string, empty array or empty object
    pub fn is_empty(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Whether a value is a string, number or boolean
    pub fn is_primitive(value: &Value) -> bool {
        matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
    }

    /// Build a JSON number from an f64, integral values become integers
    pub fn number(n: f64) -> Value {
        if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
            Value::from(n as i64)
        } else {
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
    }
}
