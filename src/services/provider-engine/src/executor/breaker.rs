//! Per-provider circuit breakers with latency quarantine
//!
//! Each provider has one [`CircuitBreaker`] shared by every call, held in a
//! [`BreakerRegistry`] that the engine owns. The breaker opens reactively when
//! the failure rate over a sliding window crosses the threshold, and
//! proactively when recent latencies show repeated spikes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Bounded ring of recent latencies for one provider
#[derive(Debug)]
pub struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
    min_samples: usize,
    factor: f64,
    floor_ms: u64,
    trip_count: usize,
}

impl LatencyWindow {
    pub fn new(config: &BreakerConfig) -> Self {
        let capacity = config.latency_window.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_samples: config.latency_min_samples,
            factor: config.latency_factor,
            floor_ms: config.latency_floor_ms,
            trip_count: config.latency_trip_count.max(1),
        }
    }

    /// Append a sample; `true` when the window now calls for quarantine
    ///
    /// The threshold is `max(mean × factor, floor)` over the window including
    /// the new sample. Quarantine needs the new sample above the threshold and
    /// at least `trip_count` samples in the window above it.
    pub fn record(&mut self, latency_ms: u64) -> bool {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);

        if self.samples.len() < self.min_samples {
            return false;
        }

        let threshold = self.threshold_ms();
        if latency_ms as f64 <= threshold {
            return false;
        }
        let slow = self
            .samples
            .iter()
            .filter(|&&sample| sample as f64 > threshold)
            .count();
        slow >= self.trip_count
    }

    pub fn threshold_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return self.floor_ms as f64;
        }
        let mean = self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64;
        (mean * self.factor).max(self.floor_ms as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Serializable view of one breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub window_calls: usize,
    pub window_failures: usize,
    pub total_successes: u64,
    pub total_failures: u64,
    pub latency_samples: usize,
    pub latency_threshold_ms: f64,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_reason: Option<String>,
}

#[derive(Debug)]
struct OpenInfo {
    since: Instant,
    at: DateTime<Utc>,
    reason: String,
}

/// Circuit breaker for one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    state: RwLock<CircuitState>,
    /// Recent outcomes, `true` for failure
    outcomes: Mutex<VecDeque<bool>>,
    latencies: Mutex<LatencyWindow>,
    opened: RwLock<Option<OpenInfo>>,
    half_open_in_flight: AtomicU32,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new<S: Into<String>>(provider: S, config: BreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            state: RwLock::new(CircuitState::Closed),
            outcomes: Mutex::new(VecDeque::with_capacity(config.failure_window)),
            latencies: Mutex::new(LatencyWindow::new(&config)),
            opened: RwLock::new(None),
            half_open_in_flight: AtomicU32::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            config,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.config.reset_timeout_secs)
    }

    /// Admit a call, moving an expired open breaker to half-open
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let expired = self
                    .opened
                    .read()
                    .as_ref()
                    .map(|info| info.since.elapsed() >= self.reset_timeout())
                    .unwrap_or(true);
                if expired {
                    info!(provider = %self.provider, "Circuit breaker half-open, allowing trial call");
                    *state = CircuitState::HalfOpen;
                    self.half_open_in_flight.store(1, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                let in_flight = self.half_open_in_flight.load(Ordering::SeqCst);
                if in_flight < self.config.half_open_max_calls.max(1) {
                    self.half_open_in_flight.fetch_add(1, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        self.success_count.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.write();
        if *state == CircuitState::HalfOpen {
            info!(provider = %self.provider, "Circuit breaker closed after successful trial");
            *state = CircuitState::Closed;
            self.half_open_in_flight.store(0, Ordering::SeqCst);
            *self.opened.write() = None;
            self.outcomes.lock().clear();
            return;
        }
        drop(state);
        self.push_outcome(false);
    }

    pub fn on_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::SeqCst);

        if self.get_state() == CircuitState::HalfOpen {
            self.open("trial call failed");
            return;
        }

        let (calls, failures) = self.push_outcome(true);
        if calls >= self.config.minimum_calls.max(1) {
            let rate = failures as f64 / calls as f64;
            if rate >= self.config.failure_rate_threshold {
                self.open(&format!(
                    "failure rate {:.0}% over {} calls",
                    rate * 100.0,
                    calls
                ));
            }
        }
    }

    /// Releases a half-open slot without judging the provider
    pub fn on_neutral(&self) {
        if self.get_state() == CircuitState::HalfOpen {
            let _ = self
                .half_open_in_flight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }

    /// Record an attempt latency; may force the breaker open
    pub fn record_latency(&self, latency_ms: u64) -> bool {
        let mut window = self.latencies.lock();
        if !window.record(latency_ms) {
            return false;
        }
        let threshold = window.threshold_ms();
        window.clear();
        drop(window);

        self.force_open(&format!(
            "latency quarantine: {}ms above {:.0}ms threshold",
            latency_ms, threshold
        ));
        true
    }

    /// Open immediately regardless of the failure window
    pub fn force_open(&self, reason: &str) {
        self.open(reason);
    }

    fn open(&self, reason: &str) {
        let mut state = self.state.write();
        if *state != CircuitState::Open {
            warn!(provider = %self.provider, reason, "Circuit breaker opened");
        }
        *state = CircuitState::Open;
        self.half_open_in_flight.store(0, Ordering::SeqCst);
        *self.opened.write() = Some(OpenInfo {
            since: Instant::now(),
            at: Utc::now(),
            reason: reason.to_string(),
        });
    }

    fn push_outcome(&self, failed: bool) -> (usize, usize) {
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() >= self.config.failure_window.max(1) {
            outcomes.pop_front();
        }
        outcomes.push_back(failed);
        let failures = outcomes.iter().filter(|&&f| f).count();
        (outcomes.len(), failures)
    }

    pub fn get_state(&self) -> CircuitState {
        *self.state.read()
    }

    pub fn reset(&self) {
        *self.state.write() = CircuitState::Closed;
        *self.opened.write() = None;
        self.outcomes.lock().clear();
        self.latencies.lock().clear();
        self.half_open_in_flight.store(0, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (window_calls, window_failures) = {
            let outcomes = self.outcomes.lock();
            (outcomes.len(), outcomes.iter().filter(|&&f| f).count())
        };
        let (latency_samples, latency_threshold_ms) = {
            let window = self.latencies.lock();
            (window.len(), window.threshold_ms())
        };
        let state = self.get_state();
        let opened = self.opened.read();

        BreakerSnapshot {
            provider: self.provider.clone(),
            state,
            window_calls,
            window_failures,
            total_successes: self.success_count.load(Ordering::SeqCst),
            total_failures: self.failure_count.load(Ordering::SeqCst),
            latency_samples,
            latency_threshold_ms,
            opened_at: opened.as_ref().map(|info| info.at),
            open_reason: opened.as_ref().map(|info| info.reason.clone()),
        }
    }
}

/// Process-wide breakers keyed by provider name
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, provider: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(provider) {
            return breaker.clone();
        }
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.config.clone())))
            .clone()
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        self.breakers
            .get(provider)
            .map(|b| b.get_state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            reset_timeout_secs: 0,
            ..BreakerConfig::default()
        }
    }

    #[test]
    fn test_latency_quarantine_trips_on_third_spike() {
        let breaker = CircuitBreaker::new("slowpoke", BreakerConfig::default());
        for _ in 0..10 {
            assert!(!breaker.record_latency(500));
        }
        assert!(!breaker.record_latency(2100));
        assert_eq!(breaker.get_state(), CircuitState::Closed);
        assert!(!breaker.record_latency(2100));
        assert_eq!(breaker.get_state(), CircuitState::Closed);
        assert!(breaker.record_latency(2100));
        assert_eq!(breaker.get_state(), CircuitState::Open);
        assert!(breaker.snapshot().open_reason.unwrap().contains("latency"));
    }

    #[test]
    fn test_latency_floor_protects_fast_spiky_providers() {
        let mut window = LatencyWindow::new(&BreakerConfig::default());
        for sample in [100, 100, 900, 100, 1200, 100, 1500, 100, 1800, 100] {
            assert!(!window.record(sample));
        }
        assert_eq!(window.threshold_ms(), 2000.0);
    }

    #[test]
    fn test_latency_needs_minimum_samples() {
        let mut window = LatencyWindow::new(&BreakerConfig::default());
        for _ in 0..4 {
            assert!(!window.record(30_000));
        }
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn test_failure_rate_opens_breaker() {
        let breaker = CircuitBreaker::new("p", BreakerConfig::default());
        for _ in 0..4 {
            breaker.on_failure();
        }
        assert_eq!(breaker.get_state(), CircuitState::Closed);
        breaker.on_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_failure_rate_below_threshold_stays_closed() {
        let breaker = CircuitBreaker::new("p", BreakerConfig::default());
        for _ in 0..6 {
            breaker.on_success();
        }
        for _ in 0..5 {
            breaker.on_failure();
        }
        assert_eq!(breaker.get_state(), CircuitState::Closed);
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.window_calls, 11);
        assert_eq!(snapshot.window_failures, 5);
    }

    #[test]
    fn test_half_open_trial_cycle() {
        let breaker = CircuitBreaker::new("p", config());
        breaker.force_open("manual");
        assert_eq!(breaker.get_state(), CircuitState::Open);

        assert!(breaker.try_acquire());
        assert_eq!(breaker.get_state(), CircuitState::HalfOpen);
        assert!(!breaker.try_acquire());

        breaker.on_success();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("p", config());
        breaker.force_open("manual");
        assert!(breaker.try_acquire());
        breaker.on_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);
    }

    #[test]
    fn test_neutral_outcome_releases_trial_slot() {
        let breaker = CircuitBreaker::new("p", config());
        breaker.force_open("manual");
        assert!(breaker.try_acquire());
        breaker.on_neutral();
        assert_eq!(breaker.get_state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_open_breaker_waits_for_reset_timeout() {
        let breaker = CircuitBreaker::new("p", BreakerConfig::default());
        breaker.force_open("manual");
        assert!(!breaker.try_acquire());
        breaker.reset();
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_registry_shares_breakers_per_provider() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.get("alpha");
        let again = registry.get("alpha");
        assert!(Arc::ptr_eq(&a, &again));

        a.force_open("test");
        assert_eq!(registry.state("alpha"), CircuitState::Open);
        assert_eq!(registry.state("beta"), CircuitState::Closed);

        registry.get("beta");
        let names: Vec<String> = registry.snapshot_all().into_iter().map(|s| s.provider).collect();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
