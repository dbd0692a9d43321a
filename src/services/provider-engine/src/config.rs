//! Configuration module for the NumGate Provider Engine
//!
//! Settings are layered from built-in defaults, an optional file named by
//! `NUMGATE_CONFIG_FILE` and `NUMGATE_*` environment variables, in that order.
//! Nested keys use a double underscore, e.g. `NUMGATE_HTTP__MAX_ATTEMPTS=5`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Main configuration structure for the provider engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Outbound HTTP and retry settings
    pub http: HttpConfig,
    /// Circuit breaker and latency quarantine settings
    pub breaker: BreakerConfig,
    /// Catalog cache settings
    pub cache: CacheConfig,
    /// Price conversion settings
    pub pricing: PricingConfig,
    /// Redis configuration for caching and rate limiting
    pub redis: RedisConfig,
    /// Provider store configuration
    pub database: DatabaseConfig,
    /// Credential decryption settings
    pub security: SecurityConfig,
    /// Batch operation settings
    pub batch: BatchConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Absolute timeout for one attempt in seconds (default: 30)
    pub request_timeout_secs: u64,
    /// TCP connect timeout in seconds (default: 10)
    pub connect_timeout_secs: u64,
    /// Attempts per call including the first (default: 3)
    pub max_attempts: u32,
    /// Base delay for backoff in milliseconds (default: 1000)
    pub retry_base_delay_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds
    pub retry_max_delay_ms: u64,
    /// User agent sent to providers
    pub user_agent: String,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Number of recent outcomes considered for the failure rate
    pub failure_window: usize,
    /// Outcomes required before the failure rate can trip the breaker
    pub minimum_calls: usize,
    /// Failure ratio (0.0 to 1.0) that opens the breaker
    pub failure_rate_threshold: f64,
    /// Seconds an open breaker waits before allowing a trial call
    pub reset_timeout_secs: u64,
    /// Concurrent trial calls allowed while half-open
    pub half_open_max_calls: u32,
    /// Latency samples kept per provider
    pub latency_window: usize,
    /// Samples required before the latency check runs
    pub latency_min_samples: usize,
    /// Multiplier applied to the moving average
    pub latency_factor: f64,
    /// Lower bound for the latency threshold in milliseconds
    pub latency_floor_ms: u64,
    /// Slow samples in the window that force the breaker open
    pub latency_trip_count: usize,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache backend: `memory` or `redis`
    pub backend: String,
    /// Country list TTL in seconds
    pub countries_ttl_secs: u64,
    /// Service list TTL in seconds
    pub services_ttl_secs: u64,
    /// Price list TTL in seconds
    pub prices_ttl_secs: u64,
}

/// Pricing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Internal points credited per USD
    pub points_per_usd: f64,
    /// Decimal places of the smallest internal denomination
    pub decimals: u32,
    /// Seed FX rates, currency units per USD
    pub fx_rates: HashMap<String, f64>,
    /// Minutes a rented number stays valid when the provider omits expiry
    pub activation_ttl_minutes: i64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis for rate limiting and caching
    pub enabled: bool,
    /// Redis connection URL
    pub url: String,
    /// Key prefix for all Redis keys
    pub key_prefix: String,
}

/// Provider store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Load providers from PostgreSQL instead of a file
    pub enabled: bool,
    /// PostgreSQL connection URL
    pub postgres_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
    /// JSON file with provider records for the in-memory store
    pub providers_file: Option<String>,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// AES-256 key material: 64 hex characters or a passphrase
    pub encryption_key: Option<String>,
}

/// Batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Concurrent status checks in one batch (default: 10)
    pub status_concurrency: usize,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive
    pub log_level: String,
    /// Log format (json, pretty, compact)
    pub log_format: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            user_agent: format!("numgate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_window: 20,
            minimum_calls: 5,
            failure_rate_threshold: 0.5,
            reset_timeout_secs: 30,
            half_open_max_calls: 1,
            latency_window: 10,
            latency_min_samples: 5,
            latency_factor: 1.5,
            latency_floor_ms: 2000,
            latency_trip_count: 3,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            countries_ttl_secs: 3600,
            services_ttl_secs: 3600,
            prices_ttl_secs: 300,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            points_per_usd: 100.0,
            decimals: 2,
            fx_rates: HashMap::new(),
            activation_ttl_minutes: 20,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://localhost:6379".to_string(),
            key_prefix: "numgate:".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            postgres_url: "postgresql://localhost:5432/numgate".to_string(),
            max_connections: 10,
            connection_timeout: 30,
            providers_file: None,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            status_concurrency: 10,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut cfg = config::Config::builder()
            .set_default("http.request_timeout_secs", 30)?
            .set_default("http.connect_timeout_secs", 10)?
            .set_default("http.max_attempts", 3)?
            .set_default("http.retry_base_delay_ms", 1000)?
            .set_default("http.retry_max_delay_ms", 30000)?
            .set_default(
                "http.user_agent",
                format!("numgate/{}", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("breaker.failure_window", 20)?
            .set_default("breaker.minimum_calls", 5)?
            .set_default("breaker.failure_rate_threshold", 0.5)?
            .set_default("breaker.reset_timeout_secs", 30)?
            .set_default("breaker.half_open_max_calls", 1)?
            .set_default("breaker.latency_window", 10)?
            .set_default("breaker.latency_min_samples", 5)?
            .set_default("breaker.latency_factor", 1.5)?
            .set_default("breaker.latency_floor_ms", 2000)?
            .set_default("breaker.latency_trip_count", 3)?
            .set_default("cache.backend", "memory")?
            .set_default("cache.countries_ttl_secs", 3600)?
            .set_default("cache.services_ttl_secs", 3600)?
            .set_default("cache.prices_ttl_secs", 300)?
            .set_default("pricing.points_per_usd", 100.0)?
            .set_default("pricing.decimals", 2)?
            .set_default("pricing.fx_rates", HashMap::<String, f64>::new())?
            .set_default("pricing.activation_ttl_minutes", 20)?
            .set_default("redis.enabled", false)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("redis.key_prefix", "numgate:")?
            .set_default("database.enabled", false)?
            .set_default(
                "database.postgres_url",
                "postgresql://localhost:5432/numgate",
            )?
            .set_default("database.max_connections", 10)?
            .set_default("database.connection_timeout", 30)?
            .set_default("batch.status_concurrency", 10)?
            .set_default("observability.log_level", "info")?
            .set_default("observability.log_format", "json")?;

        // Load from optional config file
        if let Ok(config_path) = std::env::var("NUMGATE_CONFIG_FILE") {
            cfg = cfg.add_source(config::File::with_name(&config_path).required(false));
        }

        cfg = cfg.add_source(
            config::Environment::with_prefix("NUMGATE")
                .prefix_separator("_")
                .separator("__"),
        );

        cfg.build()?.try_deserialize()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.http.max_attempts == 0 {
            return Err("http.max_attempts must be at least 1".to_string());
        }
        if self.http.request_timeout_secs == 0 {
            return Err("http.request_timeout_secs cannot be 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.breaker.failure_rate_threshold) {
            return Err("breaker.failure_rate_threshold must be between 0.0 and 1.0".to_string());
        }
        if self.breaker.latency_window == 0
            || self.breaker.latency_min_samples > self.breaker.latency_window
        {
            return Err(
                "breaker.latency_min_samples must not exceed a non-empty latency_window"
                    .to_string(),
            );
        }
        if self.breaker.latency_factor < 1.0 {
            return Err("breaker.latency_factor must be at least 1.0".to_string());
        }

        if self.pricing.points_per_usd <= 0.0 {
            return Err("pricing.points_per_usd must be positive".to_string());
        }
        if self.pricing.decimals > 8 {
            return Err("pricing.decimals must not exceed 8".to_string());
        }
        for (currency, rate) in &self.pricing.fx_rates {
            if *rate <= 0.0 {
                return Err(format!("FX rate for {} must be positive", currency));
            }
        }

        if self.batch.status_concurrency == 0 {
            return Err("batch.status_concurrency must be at least 1".to_string());
        }

        match self.cache.backend.as_str() {
            "memory" => {}
            "redis" if self.redis.enabled => {}
            "redis" => return Err("cache.backend=redis requires redis.enabled".to_string()),
            other => return Err(format!("Unknown cache backend: {}", other)),
        }

        // Validate URLs
        if self.redis.enabled {
            Url::parse(&self.redis.url).map_err(|e| format!("Invalid Redis URL: {}", e))?;
        }
        if self.database.enabled {
            Url::parse(&self.database.postgres_url)
                .map_err(|e| format!("Invalid PostgreSQL URL: {}", e))?;
        }

        if let Some(ref key) = self.security.encryption_key {
            if key.trim().is_empty() {
                return Err("security.encryption_key cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http.max_attempts, 3);
        assert_eq!(config.http.request_timeout_secs, 30);
        assert_eq!(config.breaker.latency_window, 10);
        assert_eq!(config.breaker.latency_floor_ms, 2000);
        assert_eq!(config.batch.status_concurrency, 10);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.breaker.failure_rate_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cache.backend = "redis".to_string();
        assert!(config.validate().is_err());
        config.redis.enabled = true;
        assert!(config.validate().is_ok());

        let mut config = EngineConfig::default();
        config.database.enabled = true;
        config.database.postgres_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.pricing.fx_rates.insert("RUB".to_string(), 0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_uses_defaults() {
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.cache.prices_ttl_secs, 300);
        assert_eq!(config.pricing.activation_ttl_minutes, 20);
    }
}
