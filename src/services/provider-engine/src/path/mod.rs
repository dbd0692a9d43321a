//! Path expression evaluator
//!
//! A path is a `|`-separated chain of alternatives, each a `.`-separated list
//! of segments: literal keys, context accessors (`$key`, `$parentKey`, ...) and
//! transforms (`$sum`, `$replace:old:new`, ...). Paths are parsed once into
//! [`Segment`]s and interpreted against a JSON value and a [`PathContext`].
//!
//! Evaluation is total: it returns `None` for undefined and never panics.

mod context;
mod segment;
mod transform;

pub use context::PathContext;
pub use segment::{ContextRef, Segment};
pub use transform::Transform;

use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

use crate::utils::JsonUtils;

/// A parsed path expression
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    source: String,
    alternatives: Vec<Vec<Segment>>,
}

impl Path {
    pub fn parse(source: &str) -> Path {
        let alternatives = segment::split_unescaped(source, '|')
            .iter()
            .map(|alt| segment::tokenize(alt))
            .collect();
        Path {
            source: source.to_string(),
            alternatives,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// `$` or empty: the input itself
    pub fn is_identity(&self) -> bool {
        self.alternatives.iter().all(Vec::is_empty)
    }

    pub fn alternatives(&self) -> &[Vec<Segment>] {
        &self.alternatives
    }

    /// Resolve against `value`; the first alternative yielding a non-null value wins
    pub fn evaluate<'a>(&self, value: &'a Value, ctx: &PathContext<'a>) -> Option<Value> {
        if self.is_identity() {
            return Some(value.clone());
        }
        self.alternatives
            .iter()
            .filter_map(|segments| evaluate_segments(segments, value, ctx))
            .find(|v| !v.is_null())
    }

    /// Evaluate and render as plain text
    pub fn evaluate_string<'a>(&self, value: &'a Value, ctx: &PathContext<'a>) -> Option<String> {
        self.evaluate(value, ctx)
            .as_ref()
            .and_then(JsonUtils::to_plain_string)
    }
}

impl From<&str> for Path {
    fn from(source: &str) -> Self {
        Path::parse(source)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// One-shot convenience for callers that do not keep the parsed path
pub fn evaluate<'a>(value: &'a Value, path: &str, ctx: &PathContext<'a>) -> Option<Value> {
    Path::parse(path).evaluate(value, ctx)
}

fn evaluate_segments<'a>(
    segments: &[Segment],
    root: &'a Value,
    ctx: &PathContext<'a>,
) -> Option<Value> {
    let mut current: Option<Cow<'a, Value>> = Some(Cow::Borrowed(root));

    for segment in segments {
        current = match segment {
            Segment::Context(reference) => context_value(*reference, ctx),
            Segment::Transform(transform) => {
                let missing = matches!(current.as_deref(), None | Some(Value::Null));
                if missing && !transform.tolerates_missing() {
                    return None;
                }
                transform
                    .apply(current.map(Cow::into_owned))
                    .map(Cow::Owned)
            }
            Segment::Literal(key) => match current {
                None => return None,
                Some(Cow::Borrowed(v)) => lookup(v, key),
                Some(Cow::Owned(v)) => lookup(&v, key).map(|c| Cow::Owned(c.into_owned())),
            },
        };
    }

    current.map(Cow::into_owned)
}

fn context_value<'a>(reference: ContextRef, ctx: &PathContext<'a>) -> Option<Cow<'a, Value>> {
    let owned = |s: &Option<String>| s.clone().map(|k| Cow::Owned(Value::String(k)));
    match reference {
        ContextRef::Key => owned(&ctx.key),
        ContextRef::Value => ctx.value.map(Cow::Borrowed),
        ContextRef::ParentKey => owned(&ctx.parent_key),
        ContextRef::GrandParentKey => owned(&ctx.grand_parent_key),
        ContextRef::OperatorKey => owned(&ctx.operator_key),
        ContextRef::Index => ctx.index.map(|i| Cow::Owned(Value::from(i))),
        ContextRef::Depth => Some(Cow::Owned(Value::from(ctx.depth))),
    }
}

/// Literal key step: object member, array index, or a key mapped over an array
fn lookup<'v>(value: &'v Value, key: &str) -> Option<Cow<'v, Value>> {
    match value {
        Value::Object(map) => map.get(key).map(Cow::Borrowed),
        Value::Array(items) => {
            if let Ok(index) = key.parse::<usize>() {
                return items.get(index).map(Cow::Borrowed);
            }
            let collected: Vec<Value> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(map) => map.get(key).cloned(),
                    _ => None,
                })
                .collect();
            if collected.is_empty() {
                None
            } else {
                Some(Cow::Owned(Value::Array(collected)))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn eval(value: &Value, path: &str) -> Option<Value> {
        evaluate(value, path, &PathContext::new())
    }

    #[test]
    fn test_literal_and_index_segments() {
        let data = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
        assert_eq!(eval(&data, "data.items.1.id"), Some(json!(2)));
        assert_eq!(eval(&data, "data.items.id"), Some(json!([1, 2])));
        assert_eq!(eval(&data, "data.missing.id"), None);
    }

    #[test]
    fn test_root_returns_input() {
        let data = json!([1, 2]);
        assert_eq!(eval(&data, "$"), Some(data.clone()));
        assert_eq!(eval(&data, ""), Some(data.clone()));
    }

    #[test]
    fn test_fallback_chain() {
        let data = json!({"a": null, "b": 0, "c": 3});
        assert_eq!(eval(&data, "a|b|c"), Some(json!(0)));
        assert_eq!(eval(&data, "x|c"), Some(json!(3)));
        assert_eq!(eval(&data, "x|y|a"), None);
    }

    #[test]
    fn test_context_accessors() {
        let leaf = json!({"cost": 10});
        let root = PathContext::new();
        let ctx = root.child("us", &leaf).child("wa", &leaf);
        assert_eq!(evaluate(&leaf, "$key", &ctx), Some(json!("wa")));
        assert_eq!(evaluate(&leaf, "$parentKey.$upper", &ctx), Some(json!("US")));
        assert_eq!(evaluate(&leaf, "$grandParentKey", &ctx), None);
        assert_eq!(evaluate(&leaf, "$value.cost", &ctx), Some(json!(10)));
        assert_eq!(evaluate(&leaf, "$depth", &ctx), Some(json!(2)));

        let element = json!("x");
        let indexed = PathContext::for_index(4, &element);
        assert_eq!(evaluate(&element, "$index", &indexed), Some(json!(4)));
    }

    #[test]
    fn test_transform_chains() {
        let data = json!({"operators": {"a": {"cost": 5}, "b": {"cost": 3}}});
        assert_eq!(eval(&data, "operators.$values.cost.$min"), Some(json!(3)));
        assert_eq!(eval(&data, "operators.$keys.$join:,"), Some(json!("a,b")));
        assert_eq!(eval(&data, "operators.$count"), Some(json!(2)));
        assert_eq!(eval(&data, "phone.$trim"), None);
        assert_eq!(eval(&data, "phone.$default:none"), Some(json!("none")));
        assert_eq!(eval(&data, "phone.$exists"), Some(json!(false)));
    }

    #[test]
    fn test_null_short_circuits() {
        let data = json!({"a": null});
        assert_eq!(eval(&data, "a.b"), None);
        assert_eq!(eval(&data, "a.$upper"), None);
        assert_eq!(eval(&data, "a.$type"), Some(json!("null")));
    }

    #[test]
    fn test_evaluate_string() {
        let data = json!({"id": 12345});
        assert_eq!(
            Path::parse("id").evaluate_string(&data, &PathContext::new()),
            Some("12345".to_string())
        );
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<f64>().prop_map(JsonUtils::number),
            "[a-z0-9 ]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-c0-2]{1,2}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn evaluator_is_total(value in arb_json(), path in r"[a-c0-2$:.|,\-\\ ]{0,24}") {
            let _ = eval(&value, &path);
        }

        #[test]
        fn evaluator_is_total_for_accessors(
            value in arb_json(),
            names in prop::collection::vec(
                prop::sample::select(vec![
                    "$first", "$last", "$firstKey", "$firstValue", "$values", "$keys",
                    "$sum", "$avg", "$min", "$max", "$count", "$length", "$unique",
                    "$flatten", "$reverse", "$sort", "$lower", "$upper", "$trim",
                    "$split:", "$split:a", "$replace:a:b", "$replace::", "$substring:-3:99",
                    "$substring:x", "$slice:-2", "$join", "$padStart:5:0", "$padEnd:9999999",
                    "$number", "$int", "$string", "$boolean", "$json", "$stringify",
                    "$default:0", "$ifEmpty:", "$exists", "$entries", "$pick:a,b",
                    "$omit:", "$type", "$key", "$value", "$parentKey", "$index", "a", "0",
                ]),
                0..6,
            ),
        ) {
            let path = names.join(".");
            let _ = eval(&value, &path);
        }
    }
}
