//! Request construction from endpoint templates

use indexmap::IndexMap;
use numgate_shared::{AuthType, EndpointTemplate, ProviderConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

use super::transport::HttpRequest;
use crate::error::{EngineError, EngineResult};
use crate::utils::JsonUtils;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid placeholder regex"));

/// Call arguments substituted into `$variable` placeholders
pub type CallArgs = IndexMap<String, Value>;

/// Build an [`CallArgs`] map from string pairs
pub fn args<I, K, V>(pairs: I) -> CallArgs
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Render an endpoint template into a concrete request
///
/// `api_key` is the decrypted credential, available to templates as `$api_key`
/// and injected according to the provider's auth mode.
pub fn build_request(
    provider: &ProviderConfig,
    endpoint: &EndpointTemplate,
    call_args: &CallArgs,
    api_key: Option<&str>,
) -> EngineResult<HttpRequest> {
    let mut vars = call_args.clone();
    if let Some(key) = api_key {
        vars.entry("api_key".to_string())
            .or_insert_with(|| Value::String(key.to_string()));
    }

    let path = substitute_str(&endpoint.path, &vars);
    let mut url = resolve_url(&provider.base_url, &path)?;
    let mut headers = IndexMap::new();

    {
        let mut query = url.query_pairs_mut();
        for (name, template) in &endpoint.query_params {
            if let Some(value) = substitute_param(template, &vars) {
                query.append_pair(name, &value);
            }
        }
        if let (AuthType::Query, Some(key)) = (provider.auth_type, api_key) {
            let param = provider.auth_param.as_deref().unwrap_or("api_key");
            if !endpoint.query_params.contains_key(param) {
                query.append_pair(param, key);
            }
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }

    for (name, template) in &endpoint.headers {
        headers.insert(name.clone(), substitute_str(template, &vars));
    }
    match (provider.auth_type, api_key) {
        (AuthType::Header, Some(key)) => {
            let name = provider.auth_header.as_deref().unwrap_or("X-API-Key");
            headers.insert(name.to_string(), key.to_string());
        }
        (AuthType::Bearer, Some(key)) => {
            headers.insert("Authorization".to_string(), format!("Bearer {}", key));
        }
        _ => {}
    }

    let body = endpoint.body.as_ref().map(|b| substitute_value(b, &vars));

    Ok(HttpRequest {
        method: endpoint.method,
        url: url.to_string(),
        headers,
        body,
    })
}

fn resolve_url(base_url: &str, path: &str) -> EngineResult<Url> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Url::parse(path)
            .map_err(|e| EngineError::configuration(format!("Invalid endpoint URL '{}': {}", path, e)));
    }

    let base = base_url.trim_end_matches('/');
    let joined = match path.trim_start_matches('/') {
        "" => base.to_string(),
        rest => format!("{}/{}", base, rest),
    };
    Url::parse(&joined)
        .map_err(|e| EngineError::configuration(format!("Invalid provider URL '{}': {}", joined, e)))
}

/// A parameter consisting only of an unresolved placeholder is omitted
fn substitute_param(template: &Value, vars: &CallArgs) -> Option<String> {
    match template {
        Value::String(s) => {
            if let Some(caps) = PLACEHOLDER.captures(s) {
                if caps.get(0).map(|m| m.as_str()) == Some(s.as_str()) {
                    return vars.get(&caps[1]).and_then(JsonUtils::to_plain_string);
                }
            }
            Some(substitute_str(s, vars))
        }
        Value::Null => None,
        other => JsonUtils::to_plain_string(other),
    }
}

fn substitute_str(template: &str, vars: &CallArgs) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1])
                .and_then(JsonUtils::to_plain_string)
                .unwrap_or_default()
        })
        .into_owned()
}

/// String leaves are substituted; a leaf that is exactly one placeholder keeps
/// the argument's JSON type
fn substitute_value(template: &Value, vars: &CallArgs) -> Value {
    match template {
        Value::String(s) => {
            if let Some(caps) = PLACEHOLDER.captures(s) {
                if caps.get(0).map(|m| m.as_str()) == Some(s.as_str()) {
                    return vars.get(&caps[1]).cloned().unwrap_or(Value::Null);
                }
            }
            Value::String(substitute_str(s, vars))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numgate_shared::HttpMethod;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn provider(auth: AuthType) -> ProviderConfig {
        let mut config = ProviderConfig::new("hub", "https://hub.example/api/");
        config.auth_type = auth;
        config
    }

    fn endpoint(value: Value) -> EndpointTemplate {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_query_placeholders_and_query_auth() {
        let template = endpoint(json!({
            "path": "/handler",
            "queryParams": {
                "action": "getNumber",
                "service": "$service",
                "country": "$country",
                "operator": "$operator",
                "ref": "x-$missing"
            }
        }));
        let request = build_request(
            &provider(AuthType::Query),
            &template,
            &args([("service", json!("tg")), ("country", json!(6))]),
            Some("secret"),
        )
        .unwrap();

        assert_eq!(
            request.url,
            "https://hub.example/api/handler?action=getNumber&service=tg&country=6&ref=x-&api_key=secret"
        );
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_header_and_bearer_auth() {
        let template = endpoint(json!({"path": "balance", "headers": {"Accept": "application/json"}}));

        let mut header = provider(AuthType::Header);
        header.auth_header = Some("X-Token".to_string());
        let request = build_request(&header, &template, &CallArgs::new(), Some("k1")).unwrap();
        assert_eq!(request.headers["X-Token"], "k1");
        assert_eq!(request.headers["Accept"], "application/json");

        let request =
            build_request(&provider(AuthType::Bearer), &template, &CallArgs::new(), Some("k2")).unwrap();
        assert_eq!(request.headers["Authorization"], "Bearer k2");
        assert_eq!(request.url, "https://hub.example/api/balance");
    }

    #[test]
    fn test_full_url_path_overrides_base() {
        let template = endpoint(json!({"path": "https://other.example/v2/prices"}));
        let request = build_request(&provider(AuthType::None), &template, &CallArgs::new(), None).unwrap();
        assert_eq!(request.url, "https://other.example/v2/prices");
    }

    #[test]
    fn test_path_placeholders() {
        let template = endpoint(json!({"path": "/activations/$id/status"}));
        let request = build_request(
            &provider(AuthType::None),
            &template,
            &args([("id", json!(991))]),
            None,
        )
        .unwrap();
        assert_eq!(request.url, "https://hub.example/api/activations/991/status");
    }

    #[test]
    fn test_body_template_substitution() {
        let template = endpoint(json!({
            "method": "POST",
            "path": "orders",
            "body": {"service": "$service", "meta": {"note": "key=$api_key"}, "max": "$max_price"}
        }));
        let request = build_request(
            &provider(AuthType::None),
            &template,
            &args([("service", json!("wa")), ("max_price", json!(1.5))]),
            Some("abc"),
        )
        .unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.body,
            Some(json!({"service": "wa", "meta": {"note": "key=abc"}, "max": 1.5}))
        );
    }

    #[test]
    fn test_invalid_base_url_is_configuration_error() {
        let config = ProviderConfig::new("bad", "not a url");
        let err = build_request(&config, &EndpointTemplate::get("x"), &CallArgs::new(), None).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }
}
