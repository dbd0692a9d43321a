//! Transform accessors applied to the current value
//!
//! Every transform is total. Arguments that fail to parse produce
//! [`Transform::Identity`] at parse time, and values of the wrong type pass
//! through unchanged unless the accessor has a natural "undefined" result.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::utils::JsonUtils;

#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    // selection
    First,
    Last,
    FirstKey,
    FirstValue,
    Values,
    Keys,
    // aggregation
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Unique,
    Flatten,
    Reverse,
    Sort,
    // strings
    Lower,
    Upper,
    Trim,
    Split(String),
    Replace(String, String),
    Substring(i64, Option<i64>),
    Slice(i64, Option<i64>),
    Join(String),
    PadStart(usize, char),
    PadEnd(usize, char),
    // coercion
    Number,
    Int,
    ToString,
    Boolean,
    Json,
    Stringify,
    // defaults
    Default(Value),
    IfEmpty(Value),
    Exists,
    // shaping
    Entries,
    Pick(Vec<String>),
    Omit(Vec<String>),
    Type,
    /// Malformed accessor, leaves the value untouched
    Identity,
}

impl Transform {
    /// Parse `name` and its raw `:`-joined argument text
    ///
    /// Returns `None` when `name` is not a transform at all.
    pub fn parse(name: &str, args: Option<&str>) -> Option<Transform> {
        let transform = match name {
            "first" => Transform::First,
            "last" => Transform::Last,
            "firstKey" => Transform::FirstKey,
            "firstValue" => Transform::FirstValue,
            "values" => Transform::Values,
            "keys" => Transform::Keys,
            "sum" => Transform::Sum,
            "avg" => Transform::Avg,
            "min" => Transform::Min,
            "max" => Transform::Max,
            "count" | "length" => Transform::Count,
            "unique" => Transform::Unique,
            "flatten" => Transform::Flatten,
            "reverse" => Transform::Reverse,
            "sort" => Transform::Sort,
            "lower" => Transform::Lower,
            "upper" => Transform::Upper,
            "trim" => Transform::Trim,
            "split" => Transform::Split(args.unwrap_or_default().to_string()),
            "join" => Transform::Join(args.unwrap_or(",").to_string()),
            "replace" => match args.and_then(|a| a.split_once(':')) {
                Some((old, new)) if !old.is_empty() => {
                    Transform::Replace(old.to_string(), new.to_string())
                }
                _ => Transform::Identity,
            },
            "substring" => parse_range(args)
                .map(|(a, b)| Transform::Substring(a, b))
                .unwrap_or(Transform::Identity),
            "slice" => parse_range(args)
                .map(|(a, b)| Transform::Slice(a, b))
                .unwrap_or(Transform::Identity),
            "padStart" => parse_pad(args)
                .map(|(n, c)| Transform::PadStart(n, c))
                .unwrap_or(Transform::Identity),
            "padEnd" => parse_pad(args)
                .map(|(n, c)| Transform::PadEnd(n, c))
                .unwrap_or(Transform::Identity),
            "number" => Transform::Number,
            "int" => Transform::Int,
            "string" => Transform::ToString,
            "boolean" => Transform::Boolean,
            "json" => Transform::Json,
            "stringify" => Transform::Stringify,
            "default" => match args {
                Some(raw) => Transform::Default(literal(raw)),
                None => Transform::Identity,
            },
            "ifEmpty" => match args {
                Some(raw) => Transform::IfEmpty(literal(raw)),
                None => Transform::Identity,
            },
            "exists" => Transform::Exists,
            "entries" => Transform::Entries,
            "pick" => Transform::Pick(key_list(args)),
            "omit" => Transform::Omit(key_list(args)),
            "type" => Transform::Type,
            _ => return None,
        };
        Some(transform)
    }

    /// Accessors that still run when the current value is undefined or null
    pub fn tolerates_missing(&self) -> bool {
        matches!(
            self,
            Transform::Default(_)
                | Transform::IfEmpty(_)
                | Transform::Exists
                | Transform::Type
                | Transform::Identity
        )
    }

    pub fn apply(&self, current: Option<Value>) -> Option<Value> {
        match self {
            Transform::Default(fallback) => match current {
                None | Some(Value::Null) => Some(fallback.clone()),
                some => some,
            },
            Transform::IfEmpty(fallback) => match current {
                Some(v) if !JsonUtils::is_empty(&v) => Some(v),
                _ => Some(fallback.clone()),
            },
            Transform::Exists => Some(Value::Bool(matches!(current, Some(ref v) if !v.is_null()))),
            Transform::Type => Some(Value::String(
                match current {
                    None => "undefined",
                    Some(Value::Null) => "null",
                    Some(Value::Bool(_)) => "boolean",
                    Some(Value::Number(_)) => "number",
                    Some(Value::String(_)) => "string",
                    Some(Value::Array(_)) => "array",
                    Some(Value::Object(_)) => "object",
                }
                .to_string(),
            )),
            Transform::Identity => current,
            other => match current {
                None | Some(Value::Null) => None,
                Some(value) => other.apply_defined(value),
            },
        }
    }

    fn apply_defined(&self, value: Value) -> Option<Value> {
        match self {
            Transform::First => match value {
                Value::Array(items) => items.into_iter().next(),
                Value::Object(map) => map.into_iter().next().map(|(_, v)| v),
                other => Some(other),
            },
            Transform::Last => match value {
                Value::Array(items) => items.into_iter().last(),
                Value::Object(map) => map.into_iter().last().map(|(_, v)| v),
                other => Some(other),
            },
            Transform::FirstKey => match value {
                Value::Object(map) => map.keys().next().map(|k| Value::String(k.clone())),
                _ => None,
            },
            Transform::FirstValue => match value {
                Value::Object(map) => map.into_iter().next().map(|(_, v)| v),
                Value::Array(items) => items.into_iter().next(),
                _ => None,
            },
            Transform::Values => match value {
                Value::Object(map) => Some(Value::Array(map.into_iter().map(|(_, v)| v).collect())),
                arr @ Value::Array(_) => Some(arr),
                _ => None,
            },
            Transform::Keys => match value {
                Value::Object(map) => Some(Value::Array(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                Value::Array(items) => Some(Value::Array(
                    (0..items.len()).map(Value::from).collect(),
                )),
                _ => None,
            },
            Transform::Sum => {
                let numbers = numbers_of(&value)?;
                Some(JsonUtils::number(numbers.iter().sum()))
            }
            Transform::Avg => {
                let numbers = numbers_of(&value)?;
                if numbers.is_empty() {
                    return None;
                }
                Some(JsonUtils::number(
                    numbers.iter().sum::<f64>() / numbers.len() as f64,
                ))
            }
            Transform::Min => numbers_of(&value)?
                .into_iter()
                .reduce(f64::min)
                .map(JsonUtils::number),
            Transform::Max => numbers_of(&value)?
                .into_iter()
                .reduce(f64::max)
                .map(JsonUtils::number),
            Transform::Count => match value {
                Value::Array(items) => Some(Value::from(items.len())),
                Value::Object(map) => Some(Value::from(map.len())),
                Value::String(s) => Some(Value::from(s.chars().count())),
                _ => None,
            },
            Transform::Unique => match value {
                Value::Array(items) => {
                    let mut seen: Vec<Value> = Vec::with_capacity(items.len());
                    for item in items {
                        if !seen.contains(&item) {
                            seen.push(item);
                        }
                    }
                    Some(Value::Array(seen))
                }
                other => Some(other),
            },
            Transform::Flatten => match value {
                Value::Array(items) => Some(Value::Array(
                    items
                        .into_iter()
                        .flat_map(|item| match item {
                            Value::Array(inner) => inner,
                            single => vec![single],
                        })
                        .collect(),
                )),
                other => Some(other),
            },
            Transform::Reverse => match value {
                Value::Array(mut items) => {
                    items.reverse();
                    Some(Value::Array(items))
                }
                Value::String(s) => Some(Value::String(s.chars().rev().collect())),
                other => Some(other),
            },
            Transform::Sort => match value {
                Value::Array(mut items) => {
                    items.sort_by(compare_values);
                    Some(Value::Array(items))
                }
                other => Some(other),
            },
            Transform::Lower => map_string(value, |s| s.to_lowercase()),
            Transform::Upper => map_string(value, |s| s.to_uppercase()),
            Transform::Trim => map_string(value, |s| s.trim().to_string()),
            Transform::Split(separator) => match value {
                Value::String(s) => {
                    let parts: Vec<Value> = if separator.is_empty() {
                        s.chars().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str())
                            .map(|p| Value::String(p.to_string()))
                            .collect()
                    };
                    Some(Value::Array(parts))
                }
                other => Some(other),
            },
            Transform::Replace(old, new) => map_string(value, |s| s.replace(old.as_str(), new)),
            Transform::Substring(start, end) => match value {
                Value::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let (a, b) = clamp_range(*start, *end, chars.len(), false);
                    Some(Value::String(chars[a..b].iter().collect()))
                }
                Value::Number(n) => {
                    let chars: Vec<char> = n.to_string().chars().collect();
                    let (a, b) = clamp_range(*start, *end, chars.len(), false);
                    Some(Value::String(chars[a..b].iter().collect()))
                }
                other => Some(other),
            },
            Transform::Slice(start, end) => match value {
                Value::Array(items) => {
                    let (a, b) = clamp_range(*start, *end, items.len(), true);
                    Some(Value::Array(items[a..b].to_vec()))
                }
                Value::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let (a, b) = clamp_range(*start, *end, chars.len(), true);
                    Some(Value::String(chars[a..b].iter().collect()))
                }
                other => Some(other),
            },
            Transform::Join(separator) => match value {
                Value::Array(items) => Some(Value::String(
                    items
                        .iter()
                        .filter_map(JsonUtils::to_plain_string)
                        .collect::<Vec<_>>()
                        .join(separator),
                )),
                other => Some(other),
            },
            Transform::PadStart(width, fill) => pad(value, *width, *fill, true),
            Transform::PadEnd(width, fill) => pad(value, *width, *fill, false),
            Transform::Number => JsonUtils::as_f64(&value).map(JsonUtils::number),
            Transform::Int => JsonUtils::as_f64(&value).map(|n| Value::from(n.trunc() as i64)),
            Transform::ToString => match value {
                Value::Array(_) | Value::Object(_) => Some(Value::String(value.to_string())),
                other => JsonUtils::to_plain_string(&other).map(Value::String),
            },
            Transform::Boolean => Some(Value::Bool(match &value {
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "y" | "on" => true,
                    "false" | "0" | "no" | "n" | "off" | "" => false,
                    _ => true,
                },
                other => JsonUtils::is_truthy(other),
            })),
            Transform::Json => match value {
                Value::String(s) => Some(serde_json::from_str(&s).unwrap_or(Value::String(s))),
                other => Some(other),
            },
            Transform::Stringify => Some(Value::String(value.to_string())),
            Transform::Entries => match value {
                Value::Object(map) => Some(Value::Array(
                    map.into_iter()
                        .map(|(k, v)| entry(Value::String(k), v))
                        .collect(),
                )),
                Value::Array(items) => Some(Value::Array(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| entry(Value::from(i), v))
                        .collect(),
                )),
                _ => None,
            },
            Transform::Pick(keys) => match value {
                Value::Object(map) => Some(Value::Object(
                    map.into_iter().filter(|(k, _)| keys.contains(k)).collect(),
                )),
                other => Some(other),
            },
            Transform::Omit(keys) => match value {
                Value::Object(map) => Some(Value::Object(
                    map.into_iter().filter(|(k, _)| !keys.contains(k)).collect(),
                )),
                other => Some(other),
            },
            Transform::Default(_)
            | Transform::IfEmpty(_)
            | Transform::Exists
            | Transform::Type
            | Transform::Identity => self.apply(Some(value)),
        }
    }
}

fn parse_range(args: Option<&str>) -> Option<(i64, Option<i64>)> {
    let args = args?;
    let (start, end) = match args.split_once(':') {
        Some((a, b)) => (a, Some(b)),
        None => (args, None),
    };
    let start = start.trim().parse::<i64>().ok()?;
    let end = match end.map(str::trim) {
        Some("") | None => None,
        Some(raw) => Some(raw.parse::<i64>().ok()?),
    };
    Some((start, end))
}

fn parse_pad(args: Option<&str>) -> Option<(usize, char)> {
    let args = args?;
    let (width, fill) = match args.split_once(':') {
        Some((w, f)) => (w, f.chars().next().unwrap_or(' ')),
        None => (args, ' '),
    };
    // Widths beyond this are treated as malformed
    let width = width.trim().parse::<usize>().ok().filter(|w| *w <= 1024)?;
    Some((width, fill))
}

fn key_list(args: Option<&str>) -> Vec<String> {
    args.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// JSON literal when the argument parses as one, otherwise a plain string
fn literal(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
        _ => Value::String(raw.to_string()),
    }
}

fn numbers_of(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(JsonUtils::as_f64).collect()),
        Value::Object(map) => Some(map.values().filter_map(JsonUtils::as_f64).collect()),
        other => JsonUtils::as_f64(other).map(|n| vec![n]),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (JsonUtils::as_f64(a), JsonUtils::as_f64(b)) {
        (Some(x), Some(y)) if !a.is_string() || !b.is_string() => {
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        _ => {
            let x = JsonUtils::to_plain_string(a).unwrap_or_default();
            let y = JsonUtils::to_plain_string(b).unwrap_or_default();
            x.cmp(&y)
        }
    }
}

fn map_string<F: Fn(&str) -> String>(value: Value, f: F) -> Option<Value> {
    match value {
        Value::String(s) => Some(Value::String(f(&s))),
        other => Some(other),
    }
}

fn pad(value: Value, width: usize, fill: char, start: bool) -> Option<Value> {
    let text = match value {
        Value::Array(_) | Value::Object(_) => return Some(value),
        other => JsonUtils::to_plain_string(&other)?,
    };
    let len = text.chars().count();
    if len >= width {
        return Some(Value::String(text));
    }
    let padding: String = std::iter::repeat(fill).take(width - len).collect();
    Some(Value::String(if start {
        format!("{}{}", padding, text)
    } else {
        format!("{}{}", text, padding)
    }))
}

fn entry(key: Value, value: Value) -> Value {
    let mut map = Map::new();
    map.insert("key".to_string(), key);
    map.insert("value".to_string(), value);
    Value::Object(map)
}

/// Resolve a possibly negative range against `len`, always in bounds
fn clamp_range(start: i64, end: Option<i64>, len: usize, allow_negative: bool) -> (usize, usize) {
    let len_i = len as i64;
    let resolve = |i: i64| -> usize {
        let i = if i < 0 && allow_negative { len_i + i } else { i };
        i.clamp(0, len_i) as usize
    };
    let a = resolve(start);
    let b = end.map(resolve).unwrap_or(len);
    if b < a {
        (a, a)
    } else {
        (a, b)
    }
}
