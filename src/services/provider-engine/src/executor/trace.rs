use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use numgate_shared::HttpMethod;
use serde::Serialize;

use super::transport::HttpRequest;
use crate::utils::StringUtils;

const MAX_TRACE_BODY: usize = 2000;

/// Last request/response exchanged with a provider, safe to log or display
#[derive(Debug, Clone, Serialize)]
pub struct RequestTrace {
    pub provider: String,
    pub endpoint: String,
    pub method: HttpMethod,
    /// URL with credential-looking query values masked
    pub url: String,
    pub request_headers: IndexMap<String, String>,
    pub status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl RequestTrace {
    pub fn new(provider: &str, endpoint: &str, request: &HttpRequest) -> Self {
        Self {
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            method: request.method,
            url: mask_url(&request.url),
            request_headers: StringUtils::mask_headers(&request.headers),
            status: None,
            response_body: None,
            error: None,
            attempts: 0,
            latency_ms: 0,
            timestamp: Utc::now(),
        }
    }

    /// Record one attempt's outcome; later attempts overwrite earlier ones
    pub fn record_attempt(&mut self, attempt: u32, latency_ms: u64) {
        self.attempts = attempt;
        self.latency_ms = latency_ms;
    }

    pub fn record_response(&mut self, status: u16, body: &str) {
        self.status = Some(status);
        self.response_body = Some(StringUtils::truncate(body, MAX_TRACE_BODY));
        self.error = None;
    }

    pub fn record_error(&mut self, error: &str) {
        self.error = Some(error.to_string());
    }
}

fn mask_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    if url.query().is_none() {
        return raw.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if StringUtils::is_sensitive_header(&k) {
                StringUtils::mask_sensitive(&v, 4)
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_masks_credentials() {
        let mut headers = IndexMap::new();
        headers.insert("Authorization".to_string(), "Bearer abcdefghijklmnop".to_string());
        headers.insert("Accept".to_string(), "text/plain".to_string());
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "https://hub.example/api?action=getBalance&api_key=0123456789abcdef".to_string(),
            headers,
            body: None,
        };

        let mut trace = RequestTrace::new("hub", "getBalance", &request);
        trace.record_response(200, "ACCESS_BALANCE:10");
        assert!(!trace.url.contains("0123456789abcdef"));
        assert!(trace.url.contains("action=getBalance"));
        assert_ne!(trace.request_headers["Authorization"], "Bearer abcdefghijklmnop");
        assert_eq!(trace.request_headers["Accept"], "text/plain");
        assert_eq!(trace.status, Some(200));
    }

    #[test]
    fn test_trace_truncates_large_bodies() {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "https://hub.example/".to_string(),
            headers: IndexMap::new(),
            body: None,
        };
        let body = "x".repeat(5000);
        let mut trace = RequestTrace::new("hub", "getPrices", &request);
        trace.record_response(200, &body);
        assert!(trace.response_body.unwrap().len() < 2100);
    }

    #[test]
    fn test_trace_reflects_latest_attempt() {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "https://hub.example/".to_string(),
            headers: IndexMap::new(),
            body: None,
        };
        let mut trace = RequestTrace::new("hub", "getBalance", &request);
        trace.record_attempt(1, 15);
        trace.record_error("connection refused");
        assert_eq!(trace.error.as_deref(), Some("connection refused"));

        trace.record_attempt(2, 40);
        trace.record_response(200, "ACCESS_BALANCE:3");
        assert_eq!(trace.attempts, 2);
        assert_eq!(trace.latency_ms, 40);
        assert_eq!(trace.status, Some(200));
        assert!(trace.error.is_none());
    }
}
