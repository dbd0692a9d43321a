//! Price normalization
//!
//! Provider prices are quoted in the provider's currency. They are converted
//! to USD with the provider's normalization mode and then to internal points
//! at `points_per_usd`.

use chrono::{DateTime, Utc};
use numgate_shared::{NormalizationMode, PricingSettings};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::PricingConfig;
use crate::error::{EngineError, EngineResult};

/// Tolerance absorbing binary float noise before rounding up
const CEIL_EPSILON: f64 = 1e-9;

/// USD-anchored exchange rates: currency units per one USD
#[derive(Debug, Default)]
pub struct FxRateCache {
    rates: RwLock<HashMap<String, f64>>,
    updated_at: RwLock<Option<DateTime<Utc>>>,
}

impl FxRateCache {
    pub fn new(seed: &HashMap<String, f64>) -> Self {
        let cache = Self::default();
        if !seed.is_empty() {
            cache.update_rates(seed.clone());
        }
        cache
    }

    /// Replace the whole rate table
    pub fn update_rates(&self, rates: HashMap<String, f64>) {
        let normalized: HashMap<String, f64> = rates
            .into_iter()
            .filter(|(_, rate)| rate.is_finite() && *rate > 0.0)
            .map(|(currency, rate)| (currency.to_uppercase(), rate))
            .collect();
        debug!(count = normalized.len(), "FX rates updated");
        *self.rates.write() = normalized;
        *self.updated_at.write() = Some(Utc::now());
    }

    pub fn set_rate(&self, currency: &str, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rates.write().insert(currency.to_uppercase(), rate);
            *self.updated_at.write() = Some(Utc::now());
        }
    }

    pub fn rate(&self, currency: &str) -> Option<f64> {
        let currency = currency.to_uppercase();
        if currency == "USD" {
            return Some(1.0);
        }
        self.rates.read().get(&currency).copied()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        *self.updated_at.read()
    }
}

/// Converts provider prices into internal points
#[derive(Debug, Clone)]
pub struct PriceNormalizer {
    fx: Arc<FxRateCache>,
    points_per_usd: f64,
    decimals: u32,
}

impl PriceNormalizer {
    pub fn new(config: &PricingConfig, fx: Arc<FxRateCache>) -> Self {
        Self {
            fx,
            points_per_usd: config.points_per_usd,
            decimals: config.decimals,
        }
    }

    pub fn fx(&self) -> &Arc<FxRateCache> {
        &self.fx
    }

    /// Provider currency units per USD under the provider's mode
    pub fn units_per_usd(&self, settings: &PricingSettings) -> EngineResult<f64> {
        match settings.normalization_mode {
            NormalizationMode::Manual => settings
                .manual_rate
                .filter(|rate| rate.is_finite() && *rate > 0.0)
                .ok_or_else(|| EngineError::pricing("MANUAL normalization requires a positive manualRate")),
            NormalizationMode::SmartAuto => match (settings.deposit_amount, settings.deposit_spent_usd) {
                (Some(units), Some(usd)) if units > 0.0 && usd > 0.0 => Ok(units / usd),
                _ => {
                    debug!(currency = %settings.currency, "Deposit figures missing, using FX rate");
                    self.market_rate(&settings.currency)
                }
            },
            NormalizationMode::Api | NormalizationMode::Auto => self.market_rate(&settings.currency),
        }
    }

    fn market_rate(&self, currency: &str) -> EngineResult<f64> {
        self.fx
            .rate(currency)
            .ok_or_else(|| EngineError::pricing(format!("No FX rate for currency {}", currency)))
    }

    /// Provider amount to internal points
    pub fn normalize(&self, raw: f64, settings: &PricingSettings) -> EngineResult<f64> {
        let usd = raw / self.units_per_usd(settings)?;
        Ok(usd * self.points_per_usd)
    }

    /// Internal points back to the provider amount
    pub fn denormalize(&self, points: f64, settings: &PricingSettings) -> EngineResult<f64> {
        let usd = points / self.points_per_usd;
        Ok(usd * self.units_per_usd(settings)?)
    }

    /// Price charged to users: multiplier and markup applied, rounded up
    pub fn user_price(&self, raw: f64, settings: &PricingSettings) -> EngineResult<f64> {
        let base = self.normalize(raw, settings)?;
        let markup = self.normalize(settings.fixed_markup, settings)?;
        Ok(self.ceil_to_denomination(base * settings.price_multiplier + markup))
    }

    /// Round up to the smallest internal denomination
    pub fn ceil_to_denomination(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.decimals as i32);
        (value * factor - CEIL_EPSILON).ceil() / factor
    }
}
