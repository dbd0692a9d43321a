//! # NumGate Provider Engine
//!
//! Configuration-driven adapters for virtual number providers. Every provider
//! is described by data: endpoint templates say how to call it, response
//! mappings say how to read it. No provider has hand-written client code.
//!
//! ## Features
//!
//! - **Path expressions**: dotted paths with `|` fallbacks, context variables
//!   (`$key`, `$parentKey`, `$operatorKey`, ...) and transforms
//! - **Structural parsers**: arrays, recursive dictionaries, objects, scalars,
//!   positional rows, keyed maps, tables, regex and line-based text
//! - **Error classification**: configured substrings and `/regex/` patterns
//!   mapped onto a universal error taxonomy
//! - **Resilience**: retries with backoff, distributed rate limiting and a
//!   per-provider circuit breaker that also opens on latency spikes
//! - **Pricing**: provider prices converted to internal points
//! - **Webhooks**: signature, token and IP verification plus SMS extraction
//!
//! ## Usage
//!
//! ```rust,no_run
//! use provider_engine::{EngineConfig, EngineServices};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env()?;
//!     let services = Arc::new(EngineServices::from_config(config).await?);
//!     let provider = services.provider("smshub").await?;
//!     println!("balance: {}", provider.get_balance().await?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classifier;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod metrics;
pub mod parsers;
pub mod path;
pub mod pricing;
pub mod store;
pub mod utils;
pub mod webhook;

// Re-export main types for easier usage
pub use cache::{CacheStore, MemoryCache, RedisCache};
pub use classifier::{ErrorClassifier, ProviderError};
pub use config::EngineConfig;
pub use crypto::{AesGcmCipher, CredentialCipher};
pub use engine::{DynamicProvider, EngineServices, ParsedResponse, SyncReport};
pub use error::{EngineError, EngineResult, ErrorCategory};
pub use executor::{
    BreakerRegistry, CircuitBreaker, CircuitState, Executor, HttpRequest, HttpTransport,
    MemoryRateLimiter, RateLimiter, RawResponse, RedisRateLimiter, RequestTrace, TransportError,
    TransportErrorKind,
};
pub use mapping::{CompiledMapping, Record};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use parsers::Payload;
pub use pricing::{FxRateCache, PriceNormalizer};
pub use store::{HealthRecord, MemoryProviderStore, PgProviderStore, ProviderStore};
pub use webhook::WebhookVerification;

/// Version information for the provider engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "provider-engine";
