//! Shared fixtures for the provider engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use numgate_shared::ProviderConfig;
use parking_lot::Mutex;
use provider_engine::{
    AesGcmCipher, CredentialCipher, EngineConfig, EngineServices, HttpRequest, HttpTransport,
    MemoryCache, MemoryProviderStore, MemoryRateLimiter, RawResponse, TransportError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const ENCRYPTION_KEY: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f00f1e2d3c4b5a69788796a5b4c3d2e1f0";
pub const API_KEY: &str = "hub-secret-api-key";

type Responder = Box<dyn Fn(&HttpRequest) -> Result<RawResponse, TransportError> + Send + Sync>;

/// Transport answering every request through a closure and recording it
pub struct FakeTransport {
    responder: Responder,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Always answer with `status` and `body`
    pub fn fixed(status: u16, body: &str) -> Arc<Self> {
        let body = body.to_string();
        Self::new(move |_| Ok(RawResponse::new(status, body.clone())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        (self.responder)(request)
    }
}

/// Engine configuration with millisecond backoff
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.http.retry_base_delay_ms = 1;
    config.http.retry_max_delay_ms = 5;
    config
}

pub fn cipher() -> AesGcmCipher {
    AesGcmCipher::from_secret(ENCRYPTION_KEY).unwrap()
}

pub struct Harness {
    pub services: Arc<EngineServices>,
    pub store: Arc<MemoryProviderStore>,
}

/// In-memory engine services around `transport`
pub fn harness(transport: Arc<FakeTransport>, providers: Vec<ProviderConfig>) -> Harness {
    let store = Arc::new(MemoryProviderStore::with_providers(providers));
    let cipher: Arc<dyn CredentialCipher> = Arc::new(cipher());
    let services = EngineServices::new(
        test_config(),
        transport,
        Arc::new(MemoryRateLimiter::new()),
        Arc::new(MemoryCache::new()),
        store.clone(),
        Some(cipher),
    );
    Harness {
        services: Arc::new(services),
        store,
    }
}

/// Text protocol provider with query-string auth, priced in RUB at a manual rate
pub fn text_provider() -> ProviderConfig {
    let sealed = cipher().encrypt(API_KEY).unwrap();
    provider_from(json!({
        "name": "hub",
        "baseUrl": "https://hub.example/stubs/handler_api.php",
        "authType": "query",
        "apiKeyEncrypted": sealed,
        "currency": "RUB",
        "normalizationMode": "MANUAL",
        "manualRate": 90.0,
        "endpoints": {
            "getBalance": { "path": "", "queryParams": { "action": "getBalance" } },
            "getNumber": {
                "path": "",
                "queryParams": { "action": "getNumber", "service": "$service", "country": "$country", "operator": "$operator" }
            },
            "getStatus": { "path": "", "queryParams": { "action": "getStatus", "id": "$id" } },
            "setCancel": { "path": "", "queryParams": { "action": "setStatus", "status": "8", "id": "$id" } }
        },
        "mappings": {
            "getBalance": {
                "type": "text_regex",
                "pattern": "^ACCESS_BALANCE:(?P<balance>[0-9.]+)$"
            },
            "getNumber": {
                "type": "text_regex",
                "pattern": "^ACCESS_NUMBER:(?P<activationId>[^:]+):(?P<phoneNumber>[0-9]+)(?::(?P<price>[0-9.]+))?$",
                "errorPatterns": { "NO_NUMBERS": "NO_NUMBERS" }
            },
            "getStatus": {
                "type": "text_regex",
                "pattern": "^(?P<status>STATUS_[A-Z_]+)(?::(?P<code>.*))?$",
                "statusMapping": {
                    "STATUS_WAIT_CODE": "pending",
                    "STATUS_OK": "received",
                    "STATUS_CANCEL": "cancelled"
                }
            },
            "setCancel": {
                "type": "text_regex",
                "pattern": "^(?P<status>ACCESS_[A-Z_]+)$"
            }
        },
        "errorPatterns": {
            "BAD_KEY": "BAD_KEY",
            "NO_ACTIVATION": "NO_ACTIVATION",
            "/^ERROR_SQL/": "SERVER_ERROR",
            "STATUS_WAIT_CODE": "WAITING"
        }
    }))
}

/// JSON provider quoting USD prices in a nested dictionary
pub fn json_provider() -> ProviderConfig {
    provider_from(json!({
        "name": "grid",
        "baseUrl": "https://grid.example/api/v1",
        "endpoints": {
            "getCountries": { "path": "/countries" },
            "getPrices": { "path": "/prices", "queryParams": { "country": "$country" } },
            "getNumber": { "path": "/numbers", "queryParams": { "country": "$country", "service": "$service" } }
        },
        "mappings": {
            "getCountries": {
                "type": "json_array",
                "rootPath": "data",
                "fields": { "id": "id", "code": "iso.$lower", "name": "title|name" }
            },
            "getPrices": {
                "type": "json_dictionary",
                "fields": {
                    "country": "$parentKey",
                    "service": "$key",
                    "cost": "cost",
                    "count": "count"
                }
            },
            "getNumber": {
                "type": "json_object",
                "fields": {
                    "activationId": "id",
                    "phoneNumber": "phone",
                    "price": "price",
                    "expiresAt": "expires"
                }
            }
        }
    }))
}

pub fn provider_from(value: Value) -> ProviderConfig {
    serde_json::from_value(value).unwrap()
}

/// Query parameter `name` of a recorded request
pub fn query_param(request: &HttpRequest, name: &str) -> Option<String> {
    url::Url::parse(&request.url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
