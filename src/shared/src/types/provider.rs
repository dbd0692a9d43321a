//! Provider configuration records
//!
//! One [`ProviderConfig`] describes everything the engine knows about an
//! external provider: how to reach it, how to authenticate, how each endpoint
//! is called and how each response is mapped. These records are authored by
//! administrators and stored as JSON; the engine only reads them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::errors::UniversalErrorKind;
use super::models::LifecycleStatus;

// ============================================================================
// PROVIDER RECORD
// ============================================================================

/// Complete configuration of one external provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Stable provider name, used as the key for breakers, limits and caches
    pub name: String,
    /// Base URL that endpoint paths are joined to
    pub base_url: String,
    /// How the credential is attached to outgoing requests
    #[serde(default)]
    pub auth_type: AuthType,
    /// Header name for `header` auth (default `X-API-Key`)
    #[serde(default)]
    pub auth_header: Option<String>,
    /// Query parameter name for `query` auth (default `api_key`)
    #[serde(default)]
    pub auth_param: Option<String>,
    /// Encrypted credential in `iv:tag:ciphertext` hex form
    #[serde(default)]
    pub api_key_encrypted: Option<String>,
    /// Endpoint name to request template
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointTemplate>,
    /// Endpoint name to response mapping
    #[serde(default)]
    pub mappings: HashMap<String, MappingConfig>,
    /// Provider-wide error patterns, consulted after the mapping's own
    #[serde(default)]
    pub error_patterns: IndexMap<String, UniversalErrorKind>,
    /// Minimum interval between two calls to this provider, in milliseconds
    #[serde(default)]
    pub rate_limit_ms: u64,
    /// Price conversion settings
    #[serde(flatten)]
    pub pricing: PricingSettings,
    /// Inbound webhook verification
    #[serde(default)]
    pub webhook_auth: Option<WebhookAuthConfig>,
    /// Inbound webhook payload mapping
    #[serde(default)]
    pub webhook_mapping: Option<WebhookMapping>,
    /// Inactive providers are skipped by the store's listing
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Create a minimal configuration with no endpoints
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, base_url: S2) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth_type: AuthType::None,
            auth_header: None,
            auth_param: None,
            api_key_encrypted: None,
            endpoints: HashMap::new(),
            mappings: HashMap::new(),
            error_patterns: IndexMap::new(),
            rate_limit_ms: 0,
            pricing: PricingSettings::default(),
            webhook_auth: None,
            webhook_mapping: None,
            is_active: true,
        }
    }

    /// Register an endpoint together with its mapping
    pub fn with_endpoint(
        mut self,
        name: &str,
        endpoint: EndpointTemplate,
        mapping: Option<MappingConfig>,
    ) -> Self {
        self.endpoints.insert(name.to_string(), endpoint);
        if let Some(mapping) = mapping {
            self.mappings.insert(name.to_string(), mapping);
        }
        self
    }
}

/// Authentication modes supported for outgoing requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Header,
    #[serde(alias = "query_param")]
    Query,
    Bearer,
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(AuthType::None),
            "header" => Ok(AuthType::Header),
            "query" | "query_param" => Ok(AuthType::Query),
            "bearer" => Ok(AuthType::Bearer),
            _ => Err(format!("Invalid auth type: {}", s)),
        }
    }
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// HTTP methods accepted in endpoint templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of one provider endpoint
///
/// Values in `query_params`, `headers` and string leaves of `body` may carry
/// `$variable` placeholders substituted from call arguments at request time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointTemplate {
    #[serde(default)]
    pub method: HttpMethod,
    /// Relative path, or a full URL overriding the provider base
    pub path: String,
    #[serde(default)]
    pub query_params: IndexMap<String, Value>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl EndpointTemplate {
    pub fn get<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.query_params.insert(key.into(), value);
        self
    }
}

// ============================================================================
// RESPONSE MAPPINGS
// ============================================================================

/// Structural shape of an endpoint's response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    JsonArray,
    JsonDictionary,
    #[default]
    JsonObject,
    JsonValue,
    JsonArrayPositional,
    JsonKeyedValue,
    JsonNestedArray,
    TextRegex,
    TextLines,
}

impl ResponseShape {
    /// Shapes parsed from the raw text rather than decoded JSON
    pub fn is_text(&self) -> bool {
        matches!(self, ResponseShape::TextRegex | ResponseShape::TextLines)
    }
}

/// How one endpoint's raw response becomes canonical records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    #[serde(rename = "type", default)]
    pub shape: ResponseShape,
    /// Path to descend into before parsing
    #[serde(default)]
    pub root_path: Option<String>,
    /// Target field to source path expression
    #[serde(default)]
    pub fields: IndexMap<String, String>,
    #[serde(default)]
    pub transform: IndexMap<String, TransformRule>,
    /// Raw provider status to lifecycle state
    #[serde(default)]
    pub status_mapping: HashMap<String, LifecycleStatus>,
    /// Raw substring or `/regex/flags` to error kind
    #[serde(default)]
    pub error_patterns: IndexMap<String, UniversalErrorKind>,
    /// Path to the value the error classifier inspects
    #[serde(default)]
    pub error_field: Option<String>,
    #[serde(default)]
    pub extract_operators: bool,
    #[serde(default)]
    pub providers_key: Option<String>,
    #[serde(default)]
    pub required_field: Option<String>,
    /// Overrides the dictionary parser's leaf-detection vocabulary
    #[serde(default)]
    pub leaf_fields: Option<Vec<String>>,
    #[serde(default)]
    pub conditional_fields: Vec<ConditionalFields>,
    #[serde(default)]
    pub icon_url_template: Option<String>,
    /// Column index to field name for positional and tabular shapes
    #[serde(default)]
    pub position_fields: IndexMap<String, String>,
    #[serde(default)]
    pub has_header: bool,
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub value_field: Option<String>,
    /// Regex for `text_regex`
    #[serde(default)]
    pub pattern: Option<String>,
    /// Collect every regex match instead of the first
    #[serde(default)]
    pub global: bool,
    /// Column delimiter for `text_lines`
    #[serde(default)]
    pub delimiter: Option<String>,
}

impl MappingConfig {
    pub fn new(shape: ResponseShape) -> Self {
        Self {
            shape,
            ..Default::default()
        }
    }

    pub fn field<K: Into<String>, V: Into<String>>(mut self, target: K, source: V) -> Self {
        self.fields.insert(target.into(), source.into());
        self
    }

    pub fn error_pattern<K: Into<String>>(mut self, pattern: K, kind: UniversalErrorKind) -> Self {
        self.error_patterns.insert(pattern.into(), kind);
        self
    }
}

/// Field-level post-processing applied after extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRule {
    #[serde(rename = "type", default)]
    pub coerce: Option<CoerceType>,
    #[serde(default)]
    pub case: Option<CaseFold>,
    /// Template with `{value}` and `{field}` placeholders
    #[serde(default)]
    pub template: Option<String>,
    /// Used when the field is missing or null
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoerceType {
    Number,
    #[serde(alias = "int")]
    Integer,
    String,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseFold {
    Lower,
    Upper,
}

/// Extra field mappings applied when `when` evaluates truthy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionalFields {
    pub when: String,
    #[serde(default)]
    pub fields: IndexMap<String, String>,
}

// ============================================================================
// PRICING
// ============================================================================

/// Strategy used to convert a provider price into USD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalizationMode {
    Manual,
    SmartAuto,
    Api,
    #[default]
    Auto,
}

/// Per-provider pricing knobs, stored at the top level of the provider record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PricingSettings {
    /// ISO currency the provider quotes prices in
    pub currency: String,
    pub normalization_mode: NormalizationMode,
    /// Provider currency units per USD for `MANUAL`
    pub manual_rate: Option<f64>,
    /// Provider units credited by the last deposit (`SMART_AUTO`)
    pub deposit_amount: Option<f64>,
    /// USD paid for that deposit (`SMART_AUTO`)
    pub deposit_spent_usd: Option<f64>,
    pub price_multiplier: f64,
    /// Flat markup in the provider's currency
    pub fixed_markup: f64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            normalization_mode: NormalizationMode::Auto,
            manual_rate: None,
            deposit_amount: None,
            deposit_spent_usd: None,
            price_multiplier: 1.0,
            fixed_markup: 0.0,
        }
    }
}

// ============================================================================
// WEBHOOKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStrategy {
    #[default]
    None,
    IpWhitelist,
    Hmac,
    CustomHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HmacAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

/// How inbound webhook calls from a provider are authenticated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAuthConfig {
    #[serde(default)]
    pub strategy: WebhookStrategy,
    /// Exact addresses or IPv4 CIDR blocks
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub signature_header: Option<String>,
    /// Encrypted HMAC secret
    #[serde(default)]
    pub secret_encrypted: Option<String>,
    #[serde(default)]
    pub algorithm: HmacAlgorithm,
    #[serde(default)]
    pub token_header: Option<String>,
    /// Encrypted static token for `custom_header`
    #[serde(default)]
    pub token_encrypted: Option<String>,
}

/// Path expressions locating SMS data in a webhook body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMapping {
    #[serde(default)]
    pub activation_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub received_at: Option<String>,
}
