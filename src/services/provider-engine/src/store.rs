//! Provider configuration store
//!
//! The engine reads provider records and writes two idempotent side effects:
//! the last synced balance and a health log entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use numgate_shared::ProviderConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Row};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{EngineError, EngineResult};

/// Health entries kept per provider by the in-memory store
pub const HEALTH_LOG_CAPACITY: usize = 100;

/// One health observation for a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub provider: String,
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthRecord {
    pub fn healthy(provider: &str, latency_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            healthy: true,
            latency_ms: Some(latency_ms),
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(provider: &str, error: &str) -> Self {
        Self {
            provider: provider.to_string(),
            healthy: false,
            latency_ms: None,
            error: Some(error.to_string()),
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn load_provider(&self, name: &str) -> EngineResult<ProviderConfig>;

    async fn list_active(&self) -> EngineResult<Vec<ProviderConfig>>;

    /// Insert or replace a provider record by name
    async fn save_provider(&self, provider: &ProviderConfig) -> EngineResult<()>;

    /// Upsert the provider's last known balance
    async fn record_balance(&self, provider: &str, balance: f64) -> EngineResult<()>;

    async fn record_health(&self, record: HealthRecord) -> EngineResult<()>;
}

/// Store backed by process memory, optionally seeded from a JSON file
#[derive(Debug, Default)]
pub struct MemoryProviderStore {
    providers: RwLock<HashMap<String, ProviderConfig>>,
    balances: RwLock<HashMap<String, (f64, DateTime<Utc>)>>,
    health: RwLock<HashMap<String, VecDeque<HealthRecord>>>,
}

/// Read a JSON array of provider records
pub async fn read_provider_file(path: &str) -> EngineResult<Vec<ProviderConfig>> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        EngineError::configuration(format!("Cannot read providers file {}: {}", path, e))
    })?;
    let providers: Vec<ProviderConfig> = serde_json::from_str(&raw)?;
    info!(path, count = providers.len(), "Loaded provider records");
    Ok(providers)
}

impl MemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers(providers: Vec<ProviderConfig>) -> Self {
        let store = Self::new();
        for provider in providers {
            store.upsert(provider);
        }
        store
    }

    /// Load a JSON array of provider records
    pub async fn from_file(path: &str) -> EngineResult<Self> {
        Ok(Self::with_providers(read_provider_file(path).await?))
    }

    pub fn upsert(&self, provider: ProviderConfig) {
        self.providers.write().insert(provider.name.clone(), provider);
    }

    pub fn balance(&self, provider: &str) -> Option<f64> {
        self.balances.read().get(provider).map(|(balance, _)| *balance)
    }

    /// Retained health entries of every provider, oldest first
    pub fn health_log(&self) -> Vec<HealthRecord> {
        let mut log: Vec<HealthRecord> = self
            .health
            .read()
            .values()
            .flat_map(|entries| entries.iter().cloned())
            .collect();
        log.sort_by_key(|record| record.checked_at);
        log
    }

    pub fn provider_health(&self, provider: &str) -> Vec<HealthRecord> {
        self.health
            .read()
            .get(provider)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderStore for MemoryProviderStore {
    async fn load_provider(&self, name: &str) -> EngineResult<ProviderConfig> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("Provider {}", name)))
    }

    async fn list_active(&self) -> EngineResult<Vec<ProviderConfig>> {
        let mut providers: Vec<ProviderConfig> = self
            .providers
            .read()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(providers)
    }

    async fn save_provider(&self, provider: &ProviderConfig) -> EngineResult<()> {
        self.upsert(provider.clone());
        Ok(())
    }

    async fn record_balance(&self, provider: &str, balance: f64) -> EngineResult<()> {
        self.balances
            .write()
            .insert(provider.to_string(), (balance, Utc::now()));
        Ok(())
    }

    async fn record_health(&self, record: HealthRecord) -> EngineResult<()> {
        let mut health = self.health.write();
        let entries = health.entry(record.provider.clone()).or_default();
        if entries.len() >= HEALTH_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(record);
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS providers (
        name TEXT PRIMARY KEY,
        config JSONB NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        balance DOUBLE PRECISION,
        balance_updated_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS provider_health_log (
        provider TEXT NOT NULL,
        checked_at TIMESTAMPTZ NOT NULL,
        healthy BOOLEAN NOT NULL,
        latency_ms BIGINT,
        error TEXT,
        PRIMARY KEY (provider, checked_at)
    )
    "#,
];

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgProviderStore {
    pool: PgPool,
}

impl PgProviderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| EngineError::configuration(format!("Database connection failed: {}", e)))?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        info!("Connected to provider database");
        Ok(store)
    }

    /// Create the provider tables when they are missing
    pub async fn ensure_schema(&self) -> EngineResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Provider schema ensured");
        Ok(())
    }
}

fn decode_provider(row: &sqlx::postgres::PgRow) -> EngineResult<ProviderConfig> {
    let Json(mut config): Json<ProviderConfig> = row.try_get("config")?;
    config.name = row.try_get("name")?;
    config.is_active = row.try_get("is_active")?;
    Ok(config)
}

#[async_trait]
impl ProviderStore for PgProviderStore {
    async fn load_provider(&self, name: &str) -> EngineResult<ProviderConfig> {
        let row = sqlx::query("SELECT name, config, is_active FROM providers WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Provider {}", name)))?;
        decode_provider(&row)
    }

    async fn list_active(&self) -> EngineResult<Vec<ProviderConfig>> {
        let rows = sqlx::query(
            "SELECT name, config, is_active FROM providers WHERE is_active ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_provider).collect()
    }

    async fn save_provider(&self, provider: &ProviderConfig) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO providers (name, config, is_active, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (name) DO UPDATE
            SET config = EXCLUDED.config, is_active = EXCLUDED.is_active, updated_at = NOW()
            "#,
        )
        .bind(&provider.name)
        .bind(Json(provider))
        .bind(provider.is_active)
        .execute(&self.pool)
        .await?;
        debug!(provider = %provider.name, "Saved provider record");
        Ok(())
    }

    async fn record_balance(&self, provider: &str, balance: f64) -> EngineResult<()> {
        sqlx::query(
            "UPDATE providers SET balance = $2, balance_updated_at = NOW() WHERE name = $1",
        )
        .bind(provider)
        .bind(balance)
        .execute(&self.pool)
        .await?;
        debug!(provider, balance, "Recorded provider balance");
        Ok(())
    }

    async fn record_health(&self, record: HealthRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_health_log (provider, checked_at, healthy, latency_ms, error)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider, checked_at) DO UPDATE
            SET healthy = EXCLUDED.healthy, latency_ms = EXCLUDED.latency_ms, error = EXCLUDED.error
            "#,
        )
        .bind(&record.provider)
        .bind(record.checked_at)
        .bind(record.healthy)
        .bind(record.latency_ms.map(|ms| ms as i64))
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
