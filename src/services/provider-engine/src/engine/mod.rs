//! Domain operations
//!
//! [`EngineServices`] owns everything shared between providers: the executor
//! with its breaker registry and metrics, the cache, the store, the price
//! normalizer and the credential cipher. [`DynamicProvider`] binds one
//! [`ProviderConfig`] to those services and exposes the public contract.
//!
//! Each operation runs the same pipeline: build the request from the endpoint
//! template, execute it, classify provider errors, parse the payload with the
//! endpoint's mapping and coerce the records into canonical models.

pub mod coerce;

use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use numgate_shared::{
    ActionResult, Country, LifecycleStatus, NumberResult, PriceData, ProviderConfig, Service,
    StatusResult, UniversalErrorKind, WebhookSms,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::cache::{connect_redis, get_or_load, CacheStore, MemoryCache, RedisCache};
use crate::classifier::ErrorClassifier;
use crate::config::EngineConfig;
use crate::crypto::{AesGcmCipher, CredentialCipher};
use crate::error::{EngineError, EngineResult};
use crate::executor::{
    build_request, BreakerRegistry, BreakerSnapshot, CallArgs, CircuitState, Executor,
    HttpTransport, MemoryRateLimiter, RateLimiter, RedisRateLimiter, RequestTrace,
    ReqwestTransport,
};
use crate::mapping::{CompiledMapping, Record};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::parsers::{self, Payload};
use crate::pricing::{FxRateCache, PriceNormalizer};
use crate::store::{
    read_provider_file, HealthRecord, MemoryProviderStore, PgProviderStore, ProviderStore,
};
use crate::utils::StringUtils;
use crate::webhook::{self, WebhookVerification};

/// Endpoint names looked up in `ProviderConfig::endpoints`
pub mod endpoints {
    pub const GET_COUNTRIES: &str = "getCountries";
    pub const GET_SERVICES: &str = "getServices";
    pub const GET_PRICES: &str = "getPrices";
    pub const GET_NUMBER: &str = "getNumber";
    pub const GET_STATUS: &str = "getStatus";
    pub const GET_BALANCE: &str = "getBalance";
    pub const SET_CANCEL: &str = "setCancel";
    pub const SET_COMPLETE: &str = "setComplete";
    pub const SET_RESEND: &str = "setResend";
}

/// Services shared by every provider handled by this process
pub struct EngineServices {
    config: EngineConfig,
    executor: Arc<Executor>,
    normalizer: PriceNormalizer,
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn ProviderStore>,
    cipher: Option<Arc<dyn CredentialCipher>>,
}

impl EngineServices {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn HttpTransport>,
        limiter: Arc<dyn RateLimiter>,
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn ProviderStore>,
        cipher: Option<Arc<dyn CredentialCipher>>,
    ) -> Self {
        let executor = Executor::new(
            transport,
            limiter,
            Arc::new(BreakerRegistry::new(config.breaker.clone())),
            Arc::new(EngineMetrics::new()),
            &config.http,
        );
        let fx = Arc::new(FxRateCache::new(&config.pricing.fx_rates));
        let normalizer = PriceNormalizer::new(&config.pricing, fx);

        Self {
            config,
            executor: Arc::new(executor),
            normalizer,
            cache,
            store,
            cipher,
        }
    }

    /// Wire real backends according to the configuration
    pub async fn from_config(config: EngineConfig) -> EngineResult<Self> {
        config.validate().map_err(EngineError::configuration)?;

        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config.http)?);

        let redis = if config.redis.enabled {
            Some(connect_redis(&config.redis).await?)
        } else {
            None
        };

        let limiter: Arc<dyn RateLimiter> = match redis {
            Some(ref conn) => Arc::new(RedisRateLimiter::new(conn.clone(), &config.redis.key_prefix)),
            None => Arc::new(MemoryRateLimiter::new()),
        };

        let cache: Arc<dyn CacheStore> = match (config.cache.backend.as_str(), &redis) {
            ("redis", Some(conn)) => Arc::new(RedisCache::new(conn.clone(), &config.redis.key_prefix)),
            _ => Arc::new(MemoryCache::new()),
        };

        let store: Arc<dyn ProviderStore> = if config.database.enabled {
            Arc::new(PgProviderStore::connect(&config.database).await?)
        } else if let Some(ref path) = config.database.providers_file {
            Arc::new(MemoryProviderStore::from_file(path).await?)
        } else {
            warn!("No provider store configured, starting with an empty in-memory store");
            Arc::new(MemoryProviderStore::new())
        };

        let cipher = config
            .security
            .encryption_key
            .as_deref()
            .map(AesGcmCipher::from_secret)
            .transpose()?
            .map(|cipher| Arc::new(cipher) as Arc<dyn CredentialCipher>);

        info!(
            redis = config.redis.enabled,
            database = config.database.enabled,
            cache = %config.cache.backend,
            "Engine services initialized"
        );

        Ok(Self::new(config, transport, limiter, cache, store, cipher))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn normalizer(&self) -> &PriceNormalizer {
        &self.normalizer
    }

    pub fn store(&self) -> &Arc<dyn ProviderStore> {
        &self.store
    }

    pub fn breakers(&self) -> Vec<BreakerSnapshot> {
        self.executor.breakers().snapshot_all()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.executor.metrics().snapshot()
    }

    /// Load a provider record from the store and bind it
    pub async fn provider(self: &Arc<Self>, name: &str) -> EngineResult<DynamicProvider> {
        let config = self.store.load_provider(name).await?;
        DynamicProvider::new(config, Arc::clone(self))
    }

    /// Every active provider in the store
    pub async fn active_providers(self: &Arc<Self>) -> EngineResult<Vec<DynamicProvider>> {
        self.store
            .list_active()
            .await?
            .into_iter()
            .map(|config| DynamicProvider::new(config, Arc::clone(self)))
            .collect()
    }

    /// Sync the balance of every active provider; failures are recorded as zero
    pub async fn sync_balances(self: &Arc<Self>) -> EngineResult<IndexMap<String, f64>> {
        let mut balances = IndexMap::new();
        for provider in self.active_providers().await? {
            let balance = provider.sync_balance().await;
            balances.insert(provider.name().to_string(), balance);
        }
        Ok(balances)
    }

    /// Sync every balance, then report breaker state and metrics for the run
    pub async fn sync_report(self: &Arc<Self>) -> EngineResult<SyncReport> {
        let balances = self.sync_balances().await?;
        Ok(SyncReport {
            balances,
            breakers: self.breakers(),
            metrics: self.metrics_snapshot(),
        })
    }

    /// Validate the provider records in a JSON file and save them to the store
    pub async fn import_providers(self: &Arc<Self>, path: &str) -> EngineResult<usize> {
        let providers = read_provider_file(path).await?;
        for config in &providers {
            // Mappings must compile before a record is accepted
            DynamicProvider::new(config.clone(), Arc::clone(self))?;
        }
        for config in &providers {
            self.store.save_provider(config).await?;
        }
        info!(path, count = providers.len(), "Imported provider records");
        Ok(providers.len())
    }
}

/// Outcome of a balance sync across all active providers
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub balances: IndexMap<String, f64>,
    pub breakers: Vec<BreakerSnapshot>,
    pub metrics: MetricsSnapshot,
}

/// A decoded, classified and parsed provider response
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub payload: Payload,
    pub records: Vec<Record>,
}

impl ParsedResponse {
    fn first(&self) -> Option<&Record> {
        self.records.first()
    }
}

/// One provider bound to the engine's shared services
pub struct DynamicProvider {
    config: ProviderConfig,
    mappings: HashMap<String, CompiledMapping>,
    classifier: ErrorClassifier,
    services: Arc<EngineServices>,
}

impl std::fmt::Debug for DynamicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicProvider")
            .field("name", &self.config.name)
            .field("endpoints", &self.config.endpoints.len())
            .finish()
    }
}

impl DynamicProvider {
    /// Compile every mapping of `config`; invalid regexes fail here rather than per call
    pub fn new(config: ProviderConfig, services: Arc<EngineServices>) -> EngineResult<Self> {
        let mappings = config
            .mappings
            .iter()
            .map(|(endpoint, mapping)| {
                CompiledMapping::compile(mapping)
                    .map(|compiled| (endpoint.clone(), compiled))
                    .map_err(|e| {
                        EngineError::configuration(format!(
                            "Provider {} mapping '{}': {}",
                            config.name, endpoint, e
                        ))
                    })
            })
            .collect::<EngineResult<HashMap<_, _>>>()?;
        let classifier = ErrorClassifier::new(&config.name, &config.error_patterns);

        Ok(Self {
            config,
            mappings,
            classifier,
            services,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn get_countries(&self) -> EngineResult<Vec<Country>> {
        let ttl = Duration::from_secs(self.services.config.cache.countries_ttl_secs);
        let key = self.cache_key("countries", &["all"]);
        get_or_load(self.services.cache.as_ref(), &key, ttl, || async {
            let response = self
                .call(endpoints::GET_COUNTRIES, &CallArgs::new())
                .await?;
            let countries: Vec<Country> =
                response.records.iter().filter_map(coerce::country).collect();
            debug!(count = countries.len(), "Fetched countries");
            Ok(countries)
        })
        .await
    }

    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn get_services(&self, country: Option<&str>) -> EngineResult<Vec<Service>> {
        let ttl = Duration::from_secs(self.services.config.cache.services_ttl_secs);
        let key = self.cache_key("services", &[country.unwrap_or("all")]);
        get_or_load(self.services.cache.as_ref(), &key, ttl, || async {
            let mut call_args = CallArgs::new();
            if let Some(country) = country {
                call_args.insert("country".to_string(), Value::from(country));
            }
            let response = self.call(endpoints::GET_SERVICES, &call_args).await?;
            let mapping = self.mappings.get(endpoints::GET_SERVICES);
            let services: Vec<Service> = response
                .records
                .iter()
                .filter_map(|record| coerce::service(record, mapping))
                .collect();
            debug!(count = services.len(), "Fetched services");
            Ok(services)
        })
        .await
    }

    /// Price list with costs converted to internal user prices
    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn get_prices(
        &self,
        country: Option<&str>,
        service: Option<&str>,
    ) -> EngineResult<Vec<PriceData>> {
        let ttl = Duration::from_secs(self.services.config.cache.prices_ttl_secs);
        let key = self.cache_key(
            "prices",
            &[country.unwrap_or("all"), service.unwrap_or("all")],
        );
        get_or_load(self.services.cache.as_ref(), &key, ttl, || async {
            let mut call_args = CallArgs::new();
            if let Some(country) = country {
                call_args.insert("country".to_string(), Value::from(country));
            }
            if let Some(service) = service {
                call_args.insert("service".to_string(), Value::from(service));
            }
            let response = self.call(endpoints::GET_PRICES, &call_args).await?;

            let mut prices = Vec::with_capacity(response.records.len());
            for mut record in response.records {
                fill_missing(&mut record, "country", country);
                fill_missing(&mut record, "service", service);
                if let Some(mut price) = coerce::price(&record) {
                    price.cost = self
                        .services
                        .normalizer
                        .user_price(price.cost, &self.config.pricing)?;
                    prices.push(price);
                }
            }
            debug!(count = prices.len(), "Fetched prices");
            Ok(prices)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Activations
    // ------------------------------------------------------------------

    /// Rent a number; `activationId` and `phoneNumber` are mandatory in the reply
    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn get_number(
        &self,
        country: &str,
        service: &str,
        operator: Option<&str>,
    ) -> EngineResult<NumberResult> {
        let mut call_args = CallArgs::new();
        call_args.insert("country".to_string(), Value::from(country));
        call_args.insert("service".to_string(), Value::from(service));
        if let Some(operator) = operator {
            call_args.insert("operator".to_string(), Value::from(operator));
        }

        let response = self.call(endpoints::GET_NUMBER, &call_args).await?;
        let parse_error = |message: &str| {
            EngineError::parse(
                self.name(),
                endpoints::GET_NUMBER,
                message,
                response.payload.text.as_str(),
            )
        };

        let record = response
            .first()
            .ok_or_else(|| parse_error("response produced no record"))?;
        let activation_id = coerce::text(record, &["activationId", "activation_id", "id"])
            .ok_or_else(|| parse_error("missing activationId"))?;
        let phone_number = coerce::text(record, &["phoneNumber", "phone_number", "phone", "number"])
            .ok_or_else(|| parse_error("missing phoneNumber"))?;

        let raw_price = coerce::number(record, &["price", "cost", "rawPrice", "activationCost"])
            .unwrap_or(0.0);
        let price = if raw_price > 0.0 {
            self.services
                .normalizer
                .user_price(raw_price, &self.config.pricing)?
        } else {
            0.0
        };

        let expires_at = ["expiresAt", "expires_at", "activationEndTime", "expires"]
            .iter()
            .find_map(|field| record.get(*field).and_then(webhook::parse_timestamp))
            .unwrap_or_else(|| {
                Utc::now()
                    + ChronoDuration::minutes(self.services.config.pricing.activation_ttl_minutes)
            });

        info!(activation_id = %activation_id, "Number rented");
        Ok(NumberResult {
            activation_id,
            phone_number,
            country_code: coerce::text(record, &["countryCode", "country"])
                .unwrap_or_else(|| country.to_string()),
            service_code: coerce::text(record, &["serviceCode", "service"])
                .unwrap_or_else(|| service.to_string()),
            price,
            raw_price,
            expires_at,
        })
    }

    /// Status of one activation; a `WAITING` classification is a pending status
    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn get_status(&self, activation_id: &str) -> EngineResult<StatusResult> {
        let call_args = activation_args(activation_id);
        match self.call(endpoints::GET_STATUS, &call_args).await {
            Ok(response) => {
                let mapping = self.mappings.get(endpoints::GET_STATUS);
                Ok(response
                    .first()
                    .map(|record| coerce::status(record, mapping))
                    .unwrap_or_default())
            }
            Err(EngineError::Provider(e)) if e.kind == UniversalErrorKind::Waiting => {
                Ok(StatusResult::pending())
            }
            Err(EngineError::Provider(e)) if e.kind == UniversalErrorKind::Received => {
                Ok(StatusResult {
                    status: LifecycleStatus::Received,
                    messages: StringUtils::first_digit_run(&e.raw, 4, 8)
                        .into_iter()
                        .collect(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Statuses of many activations with bounded concurrency; failures read as pending
    #[instrument(skip(self, activation_ids), fields(provider = %self.config.name, count = activation_ids.len()))]
    pub async fn get_statuses(&self, activation_ids: &[String]) -> IndexMap<String, StatusResult> {
        let concurrency = self.services.config.batch.status_concurrency.max(1);
        let mut results: HashMap<String, StatusResult> = stream::iter(activation_ids)
            .map(|id| async move {
                let status = match self.get_status(id).await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(activation_id = %id, error = %e, "Status check failed, reporting pending");
                        StatusResult::pending()
                    }
                };
                (id.clone(), status)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        activation_ids
            .iter()
            .map(|id| {
                let status = results.remove(id).unwrap_or_default();
                (id.clone(), status)
            })
            .collect()
    }

    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn get_balance(&self) -> EngineResult<f64> {
        let response = self.call(endpoints::GET_BALANCE, &CallArgs::new()).await?;
        response
            .first()
            .and_then(|record| {
                coerce::number(record, &["balance", "value", "amount", "sum", "result"])
            })
            .ok_or_else(|| {
                EngineError::parse(
                    self.name(),
                    endpoints::GET_BALANCE,
                    "missing balance",
                    response.payload.text.as_str(),
                )
            })
    }

    pub async fn set_cancel(&self, activation_id: &str) -> EngineResult<ActionResult> {
        self.action(endpoints::SET_CANCEL, activation_id).await
    }

    pub async fn set_complete(&self, activation_id: &str) -> EngineResult<ActionResult> {
        self.action(endpoints::SET_COMPLETE, activation_id).await
    }

    pub async fn set_resend(&self, activation_id: &str) -> EngineResult<ActionResult> {
        self.action(endpoints::SET_RESEND, activation_id).await
    }

    #[instrument(skip(self), fields(provider = %self.config.name))]
    async fn action(&self, endpoint: &str, activation_id: &str) -> EngineResult<ActionResult> {
        let response = self.call(endpoint, &activation_args(activation_id)).await?;
        let record = response.first();

        let success = record
            .and_then(|r| r.get("success"))
            .map(crate::utils::JsonUtils::is_truthy)
            .unwrap_or(true);
        let message = record
            .and_then(|r| coerce::text(r, &["message", "status", "result"]))
            .or_else(|| Some(response.payload.text.clone()).filter(|t| !t.is_empty()));

        debug!(endpoint, activation_id, success, "Activation action finished");
        Ok(ActionResult { success, message })
    }

    /// Fetch the balance and record it with a health entry; never fails
    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn sync_balance(&self) -> f64 {
        let store = &self.services.store;
        match self.get_balance().await {
            Ok(balance) => {
                if let Err(e) = store.record_balance(self.name(), balance).await {
                    warn!(error = %e, "Failed to record balance");
                }
                let latency_ms = self.last_trace().map(|t| t.latency_ms).unwrap_or(0);
                if let Err(e) = store
                    .record_health(HealthRecord::healthy(self.name(), latency_ms))
                    .await
                {
                    warn!(error = %e, "Failed to record provider health");
                }
                info!(balance, "Balance synced");
                balance
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Balance sync failed");
                if let Err(store_err) = store
                    .record_health(HealthRecord::unhealthy(self.name(), &e.to_string()))
                    .await
                {
                    warn!(error = %store_err, "Failed to record provider health");
                }
                0.0
            }
        }
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    /// Drop this provider's cached catalogs
    pub async fn invalidate_cache(&self) -> EngineResult<u64> {
        let mut removed = 0;
        for kind in ["countries", "services", "prices"] {
            let prefix = format!("{}:{}:", kind, self.config.name);
            removed += self.services.cache.invalidate_prefix(&prefix).await?;
        }
        info!(provider = %self.config.name, removed, "Provider cache invalidated");
        Ok(removed)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.services.executor.breakers().state(self.name())
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.services.executor.breakers().get(self.name()).snapshot()
    }

    /// Last traced call to this provider
    pub fn last_trace(&self) -> Option<RequestTrace> {
        self.services.executor.last_trace(self.name())
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.services.metrics_snapshot()
    }

    // ------------------------------------------------------------------
    // Webhooks
    // ------------------------------------------------------------------

    pub fn verify_webhook(
        &self,
        body: &[u8],
        headers: &IndexMap<String, String>,
        source_ip: Option<&str>,
    ) -> WebhookVerification {
        webhook::verify_webhook(
            self.config.webhook_auth.as_ref(),
            self.services.cipher.as_deref(),
            body,
            headers,
            source_ip,
        )
    }

    pub fn parse_webhook(&self, raw: &str) -> EngineResult<WebhookSms> {
        webhook::parse_webhook(raw, self.config.webhook_mapping.as_ref())
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    fn cache_key(&self, kind: &str, parts: &[&str]) -> String {
        format!("{}:{}:{}", kind, self.config.name, parts.join(":"))
    }

    fn api_key(&self) -> EngineResult<Option<String>> {
        match (&self.config.api_key_encrypted, &self.services.cipher) {
            (None, _) => Ok(None),
            (Some(sealed), Some(cipher)) => cipher.decrypt(sealed).map(Some),
            (Some(_), None) => Err(EngineError::configuration(format!(
                "Provider {} has an encrypted credential but no encryption key is configured",
                self.config.name
            ))),
        }
    }

    /// Build, execute, classify and parse one endpoint call
    pub async fn call(&self, endpoint: &str, call_args: &CallArgs) -> EngineResult<ParsedResponse> {
        let template = self
            .config
            .endpoints
            .get(endpoint)
            .ok_or_else(|| EngineError::missing_endpoint(&self.config.name, endpoint))?;
        let api_key = self.api_key()?;
        let request = build_request(&self.config, template, call_args, api_key.as_deref())?;

        let mapping = self.mappings.get(endpoint);
        let classifier = &self.classifier;
        let provider = self.config.name.as_str();

        self.services
            .executor
            .execute(&self.config, endpoint, request, move |response| {
                let payload = Payload::decode(&response.body);
                classifier.classify(&payload, mapping)?;

                if response.status >= 400 {
                    return Err(EngineError::transport(
                        provider,
                        Some(response.status),
                        response.attempts,
                        format!(
                            "HTTP {}: {}",
                            response.status,
                            StringUtils::truncate(&payload.text, 200)
                        ),
                    ));
                }

                let records = match mapping {
                    Some(mapping) => parsers::parse(&payload, mapping),
                    None => parsers::auto_parse(&payload),
                };
                debug!(provider, endpoint, records = records.len(), "Parsed provider response");
                Ok(ParsedResponse { payload, records })
            })
            .await
    }
}

fn activation_args(activation_id: &str) -> CallArgs {
    let mut call_args = CallArgs::new();
    call_args.insert("id".to_string(), Value::from(activation_id));
    call_args.insert("activationId".to_string(), Value::from(activation_id));
    call_args
}

fn fill_missing(record: &mut Record, field: &str, value: Option<&str>) {
    if let Some(value) = value {
        record
            .entry(field.to_string())
            .or_insert_with(|| Value::from(value));
    }
}
