//! Inbound webhook verification and parsing
//!
//! Providers that push SMS to us are authenticated with one of four
//! strategies, then their payload is mapped to a [`WebhookSms`] with the same
//! path expressions used for response mappings.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use indexmap::IndexMap;
use numgate_shared::{
    HmacAlgorithm, IncomingSms, WebhookAuthConfig, WebhookMapping, WebhookSms, WebhookStrategy,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::net::{IpAddr, Ipv4Addr};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::crypto::CredentialCipher;
use crate::error::{EngineError, EngineResult};
use crate::parsers::Payload;
use crate::path::{Path, PathContext};
use crate::utils::{JsonUtils, StringUtils};

const DEFAULT_SIGNATURE_HEADER: &str = "X-Signature";
const DEFAULT_TOKEN_HEADER: &str = "X-Webhook-Token";

const ACTIVATION_ID_PATHS: &str = "activationId|activation_id|id";
const TEXT_PATHS: &str = "text|sms|message";
const CODE_PATHS: &str = "code";
const SENDER_PATHS: &str = "sender|from|phoneFrom";
const RECEIVED_AT_PATHS: &str = "receivedAt|received_at|date|timestamp";

/// Outcome of webhook verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookVerification {
    pub valid: bool,
    pub error: Option<String>,
}

impl WebhookVerification {
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid<S: Into<String>>(error: S) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Check an inbound call against the provider's webhook settings
///
/// Header lookup is case-insensitive. A missing config accepts everything.
pub fn verify_webhook(
    auth: Option<&WebhookAuthConfig>,
    cipher: Option<&dyn CredentialCipher>,
    body: &[u8],
    headers: &IndexMap<String, String>,
    source_ip: Option<&str>,
) -> WebhookVerification {
    let Some(auth) = auth else {
        return WebhookVerification::valid();
    };

    let result = match auth.strategy {
        WebhookStrategy::None => Ok(()),
        WebhookStrategy::IpWhitelist => verify_ip(&auth.allowed_ips, source_ip),
        WebhookStrategy::Hmac => verify_signature(auth, cipher, body, headers),
        WebhookStrategy::CustomHeader => verify_token(auth, cipher, headers),
    };

    match result {
        Ok(()) => WebhookVerification::valid(),
        Err(reason) => {
            warn!(strategy = ?auth.strategy, reason = %reason, "Webhook verification failed");
            WebhookVerification::invalid(reason)
        }
    }
}

fn header<'a>(headers: &'a IndexMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn verify_ip(allowed: &[String], source_ip: Option<&str>) -> Result<(), String> {
    let ip: IpAddr = source_ip
        .map(str::trim)
        .ok_or_else(|| "Source IP unknown".to_string())?
        .parse()
        .map_err(|_| "Source IP is not a valid address".to_string())?;

    if allowed.iter().any(|entry| ip_matches(entry.trim(), &ip)) {
        Ok(())
    } else {
        Err(format!("IP {} is not allowed", ip))
    }
}

/// Exact address, or an IPv4 CIDR block
fn ip_matches(entry: &str, ip: &IpAddr) -> bool {
    match entry.split_once('/') {
        None => entry.parse::<IpAddr>().map(|a| a == *ip).unwrap_or(false),
        Some((network, prefix)) => {
            let (Ok(network), Ok(prefix), IpAddr::V4(ip)) =
                (network.parse::<Ipv4Addr>(), prefix.parse::<u32>(), ip)
            else {
                return false;
            };
            if prefix > 32 {
                return false;
            }
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(network) & mask) == (u32::from(*ip) & mask)
        }
    }
}

fn open_secret(
    sealed: Option<&str>,
    cipher: Option<&dyn CredentialCipher>,
    what: &str,
) -> Result<String, String> {
    let sealed = sealed.ok_or_else(|| format!("No {} configured", what))?;
    let cipher = cipher.ok_or_else(|| format!("Cannot decrypt {}: no encryption key", what))?;
    cipher
        .decrypt(sealed)
        .map_err(|e| format!("Cannot decrypt {}: {}", what, e))
}

fn verify_signature(
    auth: &WebhookAuthConfig,
    cipher: Option<&dyn CredentialCipher>,
    body: &[u8],
    headers: &IndexMap<String, String>,
) -> Result<(), String> {
    let header_name = auth
        .signature_header
        .as_deref()
        .unwrap_or(DEFAULT_SIGNATURE_HEADER);
    let provided = header(headers, header_name)
        .ok_or_else(|| format!("Missing signature header {}", header_name))?;
    // "sha256=abcd..." style prefixes
    let provided = provided
        .split_once('=')
        .map(|(_, sig)| sig)
        .unwrap_or(provided)
        .trim();
    let expected = hex::decode(provided).map_err(|_| "Invalid signature encoding".to_string())?;

    let secret = open_secret(auth.secret_encrypted.as_deref(), cipher, "webhook secret")?;
    let verified = match auth.algorithm {
        HmacAlgorithm::Sha1 => verify_mac::<Hmac<Sha1>>(secret.as_bytes(), body, &expected),
        HmacAlgorithm::Sha256 => verify_mac::<Hmac<Sha256>>(secret.as_bytes(), body, &expected),
        HmacAlgorithm::Sha512 => verify_mac::<Hmac<Sha512>>(secret.as_bytes(), body, &expected),
    };

    if verified {
        debug!(algorithm = ?auth.algorithm, "Webhook signature verified");
        Ok(())
    } else {
        Err("Signature verification failed".to_string())
    }
}

fn verify_mac<M: Mac + hmac::digest::KeyInit>(key: &[u8], body: &[u8], expected: &[u8]) -> bool {
    match <M as Mac>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(body);
            mac.verify_slice(expected).is_ok()
        }
        Err(_) => false,
    }
}

fn verify_token(
    auth: &WebhookAuthConfig,
    cipher: Option<&dyn CredentialCipher>,
    headers: &IndexMap<String, String>,
) -> Result<(), String> {
    let header_name = auth.token_header.as_deref().unwrap_or(DEFAULT_TOKEN_HEADER);
    let provided =
        header(headers, header_name).ok_or_else(|| format!("Missing token header {}", header_name))?;
    let token = open_secret(auth.token_encrypted.as_deref(), cipher, "webhook token")?;

    let matches: bool = provided.as_bytes().ct_eq(token.as_bytes()).into();
    if matches {
        Ok(())
    } else {
        Err("Token mismatch".to_string())
    }
}

/// Map a webhook body to an SMS delivery
///
/// The code falls back to the first run of 4 to 8 digits in the text.
pub fn parse_webhook(raw: &str, mapping: Option<&WebhookMapping>) -> EngineResult<WebhookSms> {
    let payload = Payload::decode(raw);
    let Some(ref body) = payload.json else {
        return Err(EngineError::webhook("Webhook body is not JSON"));
    };

    let path_for = |configured: Option<&String>, fallback: &str| {
        Path::parse(configured.map(String::as_str).unwrap_or(fallback))
    };
    let ctx = PathContext::new();
    let eval = |path: Path| path.evaluate(body, &ctx).and_then(|v| JsonUtils::to_plain_string(&v));

    let activation_id = eval(path_for(mapping.and_then(|m| m.activation_id.as_ref()), ACTIVATION_ID_PATHS))
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| EngineError::webhook("Webhook payload has no activation id"))?;
    let text = eval(path_for(mapping.and_then(|m| m.text.as_ref()), TEXT_PATHS)).unwrap_or_default();
    let code = eval(path_for(mapping.and_then(|m| m.code.as_ref()), CODE_PATHS))
        .filter(|s| !s.trim().is_empty())
        .or_else(|| StringUtils::first_digit_run(&text, 4, 8));
    let sender = eval(path_for(mapping.and_then(|m| m.sender.as_ref()), SENDER_PATHS)).unwrap_or_default();
    let received_at = path_for(mapping.and_then(|m| m.received_at.as_ref()), RECEIVED_AT_PATHS)
        .evaluate(body, &ctx)
        .and_then(|v| parse_timestamp(&v))
        .unwrap_or_else(Utc::now);

    Ok(WebhookSms {
        activation_id,
        sms: IncomingSms {
            text,
            code,
            sender,
            received_at,
        },
    })
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or unix seconds / milliseconds
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(n) = JsonUtils::as_f64(value) {
        let millis = if n > 1e12 { n as i64 } else { (n * 1000.0) as i64 };
        return Utc.timestamp_millis_opt(millis).single();
    }
    let s = value.as_str()?.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesGcmCipher;
    use pretty_assertions::assert_eq;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::from_secret("webhook-tests").unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_no_config_accepts() {
        assert!(verify_webhook(None, None, b"{}", &IndexMap::new(), None).valid);
    }

    #[test]
    fn test_ip_whitelist_with_cidr() {
        let auth = WebhookAuthConfig {
            strategy: WebhookStrategy::IpWhitelist,
            allowed_ips: vec!["10.0.0.0/8".to_string(), "192.168.1.7".to_string()],
            ..Default::default()
        };
        let check = |ip: Option<&str>| verify_webhook(Some(&auth), None, b"", &IndexMap::new(), ip).valid;

        assert!(check(Some("10.20.30.40")));
        assert!(check(Some("192.168.1.7")));
        assert!(!check(Some("192.168.1.8")));
        assert!(!check(Some("11.0.0.1")));
        assert!(!check(Some("not-an-ip")));
        assert!(!check(None));
    }

    #[test]
    fn test_hmac_signature() {
        let cipher = cipher();
        let auth = WebhookAuthConfig {
            strategy: WebhookStrategy::Hmac,
            signature_header: Some("X-Hub-Signature".to_string()),
            secret_encrypted: Some(cipher.encrypt("s3cret").unwrap()),
            algorithm: HmacAlgorithm::Sha256,
            ..Default::default()
        };
        let body = br#"{"activationId":"1"}"#;
        let signature = format!("sha256={}", sign("s3cret", body));

        let ok = verify_webhook(
            Some(&auth),
            Some(&cipher),
            body,
            &headers(&[("x-hub-signature", signature.as_str())]),
            None,
        );
        assert_eq!(ok, WebhookVerification::valid());

        let tampered = verify_webhook(
            Some(&auth),
            Some(&cipher),
            b"{}",
            &headers(&[("X-Hub-Signature", signature.as_str())]),
            None,
        );
        assert!(!tampered.valid);

        let missing = verify_webhook(Some(&auth), Some(&cipher), body, &IndexMap::new(), None);
        assert!(missing.error.unwrap().contains("Missing signature header"));

        let no_key = verify_webhook(
            Some(&auth),
            None,
            body,
            &headers(&[("X-Hub-Signature", signature.as_str())]),
            None,
        );
        assert!(!no_key.valid);
    }

    #[test]
    fn test_custom_header_token() {
        let cipher = cipher();
        let auth = WebhookAuthConfig {
            strategy: WebhookStrategy::CustomHeader,
            token_encrypted: Some(cipher.encrypt("tok-123").unwrap()),
            ..Default::default()
        };
        let valid = verify_webhook(
            Some(&auth),
            Some(&cipher),
            b"",
            &headers(&[("X-Webhook-Token", "tok-123")]),
            None,
        );
        assert!(valid.valid);

        let invalid = verify_webhook(
            Some(&auth),
            Some(&cipher),
            b"",
            &headers(&[("X-Webhook-Token", "tok-124")]),
            None,
        );
        assert_eq!(invalid.error.as_deref(), Some("Token mismatch"));
    }

    #[test]
    fn test_parse_webhook_defaults_and_code_fallback() {
        let sms = parse_webhook(
            r#"{"activation_id": 4411, "text": "Your code is 583920. Do not share", "from": "Telegram", "timestamp": 1700000000}"#,
            None,
        )
        .unwrap();
        assert_eq!(sms.activation_id, "4411");
        assert_eq!(sms.sms.code.as_deref(), Some("583920"));
        assert_eq!(sms.sms.sender, "Telegram");
        assert_eq!(sms.sms.received_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_webhook_with_mapping() {
        let mapping = WebhookMapping {
            activation_id: Some("data.order".to_string()),
            text: Some("data.sms.body".to_string()),
            code: Some("data.sms.code".to_string()),
            sender: Some("data.sms.from".to_string()),
            received_at: Some("data.sms.at".to_string()),
        };
        let sms = parse_webhook(
            r#"{"data":{"order":"A-1","sms":{"body":"code 1234","code":"9999","from":"WA","at":"2024-03-01T10:00:00Z"}}}"#,
            Some(&mapping),
        )
        .unwrap();
        assert_eq!(sms.activation_id, "A-1");
        assert_eq!(sms.sms.code.as_deref(), Some("9999"));
        assert_eq!(sms.sms.received_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_parse_webhook_rejects_bad_payloads() {
        assert!(matches!(
            parse_webhook("STATUS_OK", None),
            Err(EngineError::Webhook { .. })
        ));
        assert!(parse_webhook(r#"{"text":"hello"}"#, None).is_err());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        use serde_json::json;
        assert_eq!(
            parse_timestamp(&json!(1_700_000_000_123i64)).unwrap().timestamp_millis(),
            1_700_000_000_123
        );
        assert!(parse_timestamp(&json!("2024-01-02 03:04:05")).is_some());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
    }
}
