//! Traversal context visible to `$`-accessors

use serde_json::Value;

/// Where the evaluator currently stands inside the response tree
///
/// Parsers build one context per record. Keys are strings because every JSON
/// object key is; `index` is only set when iterating arrays.
#[derive(Debug, Clone, Default)]
pub struct PathContext<'a> {
    pub key: Option<String>,
    pub value: Option<&'a Value>,
    pub parent_key: Option<String>,
    pub grand_parent_key: Option<String>,
    pub operator_key: Option<String>,
    pub index: Option<usize>,
    pub depth: usize,
    /// Keys from the root down to (but excluding) `key`
    pub ancestors: Vec<String>,
}

impl<'a> PathContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for the `index`-th element of an array
    pub fn for_index(index: usize, value: &'a Value) -> Self {
        Self {
            index: Some(index),
            value: Some(value),
            ..Self::default()
        }
    }

    /// Context for one entry of an object
    pub fn for_entry(key: &str, value: &'a Value) -> Self {
        Self {
            key: Some(key.to_string()),
            value: Some(value),
            ..Self::default()
        }
    }

    /// Descend into `key`, shifting the current key into the parent slots
    pub fn child(&self, key: &str, value: &'a Value) -> Self {
        let mut ancestors = self.ancestors.clone();
        if let Some(ref current) = self.key {
            ancestors.push(current.clone());
        }
        Self {
            key: Some(key.to_string()),
            value: Some(value),
            parent_key: self.key.clone(),
            grand_parent_key: self.parent_key.clone(),
            operator_key: self.operator_key.clone(),
            index: None,
            depth: self.depth + 1,
            ancestors,
        }
    }

    /// Same position, tagged with the operator entry being fanned out
    pub fn with_operator(&self, operator_key: &str, value: &'a Value) -> Self {
        Self {
            operator_key: Some(operator_key.to_string()),
            value: Some(value),
            ..self.clone()
        }
    }

    /// Dotted path of the current position
    pub fn path(&self) -> String {
        let mut parts = self.ancestors.clone();
        if let Some(ref key) = self.key {
            parts.push(key.clone());
        }
        parts.join(".")
    }
}
