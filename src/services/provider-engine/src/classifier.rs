//! Provider error classification
//!
//! A short check string is taken from the response and matched against the
//! endpoint's error patterns, then the provider's global ones. The first match
//! becomes a [`ProviderError`]. There is no catch-all: a response that matches
//! nothing is a success and goes on to parsing.

use indexmap::IndexMap;
use numgate_shared::UniversalErrorKind;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::mapping::CompiledMapping;
use crate::parsers::Payload;
use crate::utils::{JsonUtils, StringUtils};

/// Check strings longer than this are success payloads, not error codes
pub const MAX_CHECK_LENGTH: usize = 500;

/// Object fields inspected when no `errorField` is configured
const HEURISTIC_FIELDS: &[&str] = &["error", "message", "status", "error_msg", "errorMessage"];

/// A classified business error returned by a provider
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Provider {provider} returned {kind}: {raw}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: UniversalErrorKind,
    /// Check string the pattern matched
    pub raw: String,
}

impl ProviderError {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        provider: S1,
        kind: UniversalErrorKind,
        raw: S2,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            raw: raw.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_permanent(&self) -> bool {
        self.kind.is_permanent()
    }

    pub fn is_lifecycle_terminal(&self) -> bool {
        self.kind.is_lifecycle_terminal()
    }

    /// Whether this outcome should be recorded against the provider's health
    pub fn affects_health(&self) -> bool {
        self.kind.affects_health()
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    /// Lowercased needle, matched case-insensitively
    Substring(String),
}

impl Matcher {
    fn compile(pattern: &str) -> Matcher {
        if let Some((body, flags)) = split_regex_literal(pattern) {
            let mut builder = RegexBuilder::new(body);
            builder
                .case_insensitive(flags.contains('i'))
                .multi_line(flags.contains('m'))
                .dot_matches_new_line(flags.contains('s'));
            match builder.build() {
                Ok(regex) => return Matcher::Regex(regex),
                Err(e) => {
                    warn!(pattern, error = %e, "Invalid error pattern regex, using substring match");
                    return Matcher::Substring(body.to_lowercase());
                }
            }
        }
        Matcher::Substring(pattern.trim().to_lowercase())
    }

    fn is_match(&self, check: &str, check_lower: &str) -> bool {
        match self {
            Matcher::Regex(regex) => regex.is_match(check),
            Matcher::Substring(needle) => !needle.is_empty() && check_lower.contains(needle.as_str()),
        }
    }
}

/// `/body/flags` split into its parts
fn split_regex_literal(pattern: &str) -> Option<(&str, &str)> {
    let rest = pattern.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if body.is_empty() || !flags.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((body, flags))
}

/// Ordered, compiled error patterns
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<(Matcher, UniversalErrorKind)>,
}

impl PatternSet {
    pub fn compile(patterns: &IndexMap<String, UniversalErrorKind>) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|(pattern, kind)| (Matcher::compile(pattern), *kind))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Kind of the first matching pattern
    pub fn find(&self, check: &str) -> Option<UniversalErrorKind> {
        let lower = check.to_lowercase();
        self.patterns
            .iter()
            .find(|(matcher, _)| matcher.is_match(check, &lower))
            .map(|(_, kind)| *kind)
    }
}

/// Per-provider classifier holding the provider-wide patterns
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    provider: String,
    global: PatternSet,
}

impl ErrorClassifier {
    pub fn new(provider: &str, global: &IndexMap<String, UniversalErrorKind>) -> Self {
        Self {
            provider: provider.to_string(),
            global: PatternSet::compile(global),
        }
    }

    /// Fail with the first matching pattern, mapping-local before global
    pub fn classify(
        &self,
        payload: &Payload,
        mapping: Option<&CompiledMapping>,
    ) -> Result<(), ProviderError> {
        let Some(check) = check_string(payload, mapping) else {
            return Ok(());
        };

        let local = mapping.and_then(|m| m.error_patterns.find(&check));
        match local.or_else(|| self.global.find(&check)) {
            Some(kind) => {
                debug!(provider = %self.provider, %kind, check = %StringUtils::truncate(&check, 80), "Classified provider error");
                Err(ProviderError::new(&self.provider, kind, check))
            }
            None => Ok(()),
        }
    }
}

/// Short string the patterns are matched against, if the response has one
pub fn check_string(payload: &Payload, mapping: Option<&CompiledMapping>) -> Option<String> {
    let candidate = match payload.json {
        None => Some(payload.text.clone()),
        Some(ref json) => mapping
            .and_then(|m| m.error_field.as_ref())
            .and_then(|path| path.evaluate(json, &Default::default()))
            .and_then(|v| render(&v))
            .or_else(|| heuristic(json)),
    };

    candidate
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s.chars().count() <= MAX_CHECK_LENGTH)
}

fn heuristic(json: &Value) -> Option<String> {
    match json {
        Value::String(s) => Some(s.clone()),
        Value::Number(_) | Value::Bool(_) => JsonUtils::to_plain_string(json),
        Value::Object(map) => HEURISTIC_FIELDS.iter().find_map(|field| match map.get(*field)? {
            Value::Object(inner) => ["message", "code", "error"]
                .iter()
                .find_map(|k| inner.get(*k).filter(|v| JsonUtils::is_primitive(v)))
                .and_then(JsonUtils::to_plain_string),
            value if JsonUtils::is_primitive(value) => JsonUtils::to_plain_string(value),
            _ => None,
        }),
        _ => None,
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
        other => JsonUtils::to_plain_string(other),
    }
}
