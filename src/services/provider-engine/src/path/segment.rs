//! Path tokenizer and segment model

use super::transform::Transform;

/// Values the traversal context can supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRef {
    Key,
    Value,
    ParentKey,
    GrandParentKey,
    OperatorKey,
    Index,
    Depth,
}

impl ContextRef {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "key" => Some(ContextRef::Key),
            "value" => Some(ContextRef::Value),
            "parentKey" => Some(ContextRef::ParentKey),
            "grandParentKey" => Some(ContextRef::GrandParentKey),
            "operatorKey" => Some(ContextRef::OperatorKey),
            "index" => Some(ContextRef::Index),
            "depth" => Some(ContextRef::Depth),
            _ => None,
        }
    }
}

/// One parsed step of a path
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Context(ContextRef),
    Transform(Transform),
}

impl Segment {
    /// Classify one dot-separated token; `None` for tokens that are no-ops
    pub fn parse(token: &str) -> Option<Segment> {
        if token.is_empty() || token == "$" {
            return None;
        }
        let Some(accessor) = token.strip_prefix('$') else {
            return Some(Segment::Literal(token.to_string()));
        };
        let (name, args) = match accessor.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (accessor, None),
        };
        if args.is_none() {
            if let Some(context) = ContextRef::from_name(name) {
                return Some(Segment::Context(context));
            }
        }
        match Transform::parse(name, args) {
            Some(transform) => Some(Segment::Transform(transform)),
            // Keys that merely start with `$`
            None => Some(Segment::Literal(token.to_string())),
        }
    }
}

/// Split on an unescaped separator; `\` escapes the next character
pub(crate) fn split_unescaped(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == separator => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            }
        } else if c == separator {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

/// Tokenize one alternative into segments
///
/// A purely numeric token that follows an accessor argument ending in a digit
/// is rejoined with it, so `$default:1.5` keeps its decimal point.
pub(crate) fn tokenize(alternative: &str) -> Vec<Segment> {
    let mut tokens: Vec<String> = Vec::new();
    for piece in split_unescaped(alternative.trim(), '.') {
        let rejoin = match tokens.last() {
            Some(prev) => {
                prev.starts_with('$')
                    && prev.contains(':')
                    && prev.ends_with(|c: char| c.is_ascii_digit())
                    && !piece.is_empty()
                    && piece.chars().all(|c| c.is_ascii_digit())
            }
            None => false,
        };
        match tokens.last_mut() {
            Some(prev) if rejoin => {
                prev.push('.');
                prev.push_str(&piece);
            }
            _ => tokens.push(piece),
        }
    }
    tokens.iter().filter_map(|t| Segment::parse(t)).collect()
}
