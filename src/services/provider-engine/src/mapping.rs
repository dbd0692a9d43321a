//! Compiled response mappings
//!
//! A [`MappingConfig`] is authored as JSON strings; [`CompiledMapping`] parses
//! every path and regex once so parsers only interpret.

use indexmap::IndexMap;
use numgate_shared::{CaseFold, CoerceType, LifecycleStatus, MappingConfig, TransformRule};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::classifier::PatternSet;
use crate::error::{EngineError, EngineResult};
use crate::path::{Path, PathContext};
use crate::utils::JsonUtils;

/// Generic parser output: ordered field name to value
pub type Record = IndexMap<String, Value>;

/// Field names that mark a dictionary node as data
pub const DEFAULT_LEAF_FIELDS: &[&str] = &[
    "cost",
    "price",
    "amount",
    "count",
    "stock",
    "quantity",
    "qty",
    "id",
    "code",
    "name",
    "status",
    "phone",
    "number",
    "activation_id",
    "rate",
    "sum",
    "balance",
];

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder regex is valid"));

#[derive(Debug, Clone)]
pub struct CompiledConditional {
    pub when: Path,
    pub fields: Vec<(String, Path)>,
}

#[derive(Debug, Clone)]
pub struct CompiledMapping {
    pub config: MappingConfig,
    pub root_path: Option<Path>,
    pub fields: Vec<(String, Path)>,
    /// Column index to field name, from `positionFields` and numeric-keyed `fields`
    pub positions: Vec<(usize, String)>,
    pub conditionals: Vec<CompiledConditional>,
    pub error_field: Option<Path>,
    pub error_patterns: PatternSet,
    pub pattern: Option<Regex>,
    pub leaf_fields: Vec<String>,
}

impl CompiledMapping {
    pub fn compile(config: &MappingConfig) -> EngineResult<Self> {
        let mut fields = Vec::new();
        let mut positions = Vec::new();
        for (target, source) in &config.fields {
            match target.parse::<usize>() {
                Ok(index) => positions.push((index, source.clone())),
                Err(_) => fields.push((target.clone(), Path::parse(source))),
            }
        }
        for (index, name) in &config.position_fields {
            let index = index.parse::<usize>().map_err(|_| {
                EngineError::configuration(format!("positionFields key '{}' is not an index", index))
            })?;
            positions.push((index, name.clone()));
        }
        positions.sort_by_key(|(index, _)| *index);

        let pattern = config
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| EngineError::configuration(format!("Invalid response pattern: {}", e)))?;

        let conditionals = config
            .conditional_fields
            .iter()
            .map(|c| CompiledConditional {
                when: Path::parse(&c.when),
                fields: c
                    .fields
                    .iter()
                    .map(|(t, s)| (t.clone(), Path::parse(s)))
                    .collect(),
            })
            .collect();

        let leaf_fields = match config.leaf_fields {
            Some(ref custom) => custom.iter().map(|f| f.to_lowercase()).collect(),
            None => DEFAULT_LEAF_FIELDS.iter().map(|f| f.to_string()).collect(),
        };

        Ok(Self {
            config: config.clone(),
            root_path: config.root_path.as_deref().map(Path::parse),
            fields,
            positions,
            conditionals,
            error_field: config.error_field.as_deref().map(Path::parse),
            error_patterns: PatternSet::compile(&config.error_patterns),
            pattern,
            leaf_fields,
        })
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Build a record from `source`: mapped fields, or the source itself when none are declared
    pub fn record_from<'a>(&self, source: &'a Value, ctx: &PathContext<'a>) -> Record {
        let record = if self.has_fields() {
            self.extract_fields(source, ctx)
        } else {
            passthrough(source)
        };
        self.finish(record, source, ctx)
    }

    /// Overlay mapped fields onto an already named row (positional, tabular, text)
    pub fn overlay(&self, base: Record, ctx: &PathContext<'_>) -> Record {
        let source = Value::Object(
            base.iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        );
        let mut row_ctx = ctx.clone();
        row_ctx.value = Some(&source);
        self.record_with_base(base, &source, &row_ctx)
    }

    /// Start from `base`, add fields mapped from `source`, then finish
    pub fn record_with_base<'a>(
        &self,
        base: Record,
        source: &'a Value,
        ctx: &PathContext<'a>,
    ) -> Record {
        let mut record = base;
        if self.has_fields() {
            record.extend(self.extract_fields(source, ctx));
        }
        self.finish(record, source, ctx)
    }

    fn extract_fields<'a>(&self, source: &'a Value, ctx: &PathContext<'a>) -> Record {
        let mut record = Record::new();
        for (target, path) in &self.fields {
            if let Some(value) = path.evaluate(source, ctx) {
                record.insert(target.clone(), value);
            }
        }
        record
    }

    /// Apply conditional fields, then transform rules
    fn finish<'a>(&self, mut record: Record, source: &'a Value, ctx: &PathContext<'a>) -> Record {
        for conditional in &self.conditionals {
            let active = conditional
                .when
                .evaluate(source, ctx)
                .map(|v| JsonUtils::is_truthy(&v))
                .unwrap_or(false);
            if !active {
                continue;
            }
            for (target, path) in &conditional.fields {
                if let Some(value) = path.evaluate(source, ctx) {
                    record.insert(target.clone(), value);
                }
            }
        }

        for (field, rule) in &self.config.transform {
            let current = record.get(field).cloned();
            if let Some(value) = apply_rule(rule, field, current, &record) {
                record.insert(field.clone(), value);
            }
        }
        record
    }

    /// Map a raw provider status, exact match first, then case-insensitive
    pub fn map_status(&self, raw: &str) -> Option<LifecycleStatus> {
        let mapping = &self.config.status_mapping;
        mapping.get(raw).copied().or_else(|| {
            let trimmed = raw.trim();
            mapping
                .iter()
                .find(|(k, _)| k.trim().eq_ignore_ascii_case(trimmed))
                .map(|(_, v)| *v)
        })
    }
}

fn passthrough(source: &Value) -> Record {
    match source {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Null => Record::new(),
        other => {
            let mut record = Record::new();
            record.insert("value".to_string(), other.clone());
            record
        }
    }
}

fn apply_rule(rule: &TransformRule, field: &str, current: Option<Value>, record: &Record) -> Option<Value> {
    let mut value = match current {
        None | Some(Value::Null) => rule.default.clone()?,
        Some(v) => v,
    };

    if let Some(template) = rule.template.as_deref() {
        value = Value::String(render_template(template, Some(&value), record));
    }

    if let Some(coerce) = rule.coerce {
        value = match coerce {
            CoerceType::Number => JsonUtils::as_f64(&value).map(JsonUtils::number)?,
            CoerceType::Integer => JsonUtils::as_f64(&value).map(|n| Value::from(n.trunc() as i64))?,
            CoerceType::String => Value::String(JsonUtils::to_plain_string(&value)?),
            CoerceType::Boolean => Value::Bool(JsonUtils::is_truthy(&value)),
        };
    }

    if let (Some(case), Value::String(s)) = (rule.case, &value) {
        value = Value::String(match case {
            CaseFold::Lower => s.to_lowercase(),
            CaseFold::Upper => s.to_uppercase(),
        });
    }

    tracing::trace!(field, ?value, "Applied transform rule");
    Some(value)
}

/// Substitute `{value}` and `{field}` placeholders; unknown placeholders become empty
pub fn render_template(template: &str, value: Option<&Value>, record: &Record) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let resolved = if name == "value" {
                value
            } else {
                record.get(name)
            };
            resolved
                .and_then(JsonUtils::to_plain_string)
                .unwrap_or_default()
        })
        .into_owned()
}
