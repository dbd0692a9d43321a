//! Per-provider request metrics
//!
//! Every executor call is recorded against its provider: attempt latencies go
//! into a histogram, final outcomes into success and failure counters, and
//! failures are broken down by error code.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Latency distribution of provider attempts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyHistogram {
    /// < 100ms attempts
    pub under_100ms: u64,
    /// 100ms - 500ms attempts
    pub ms_100_to_500: u64,
    /// 500ms - 1s attempts
    pub ms_500_to_1000: u64,
    /// 1s - 2s attempts
    pub ms_1000_to_2000: u64,
    /// 2s - 5s attempts
    pub ms_2000_to_5000: u64,
    /// > 5s attempts, including timeouts
    pub over_5000ms: u64,
}

impl LatencyHistogram {
    pub fn record(&mut self, latency_ms: u64) {
        match latency_ms {
            0..=99 => self.under_100ms += 1,
            100..=499 => self.ms_100_to_500 += 1,
            500..=999 => self.ms_500_to_1000 += 1,
            1000..=1999 => self.ms_1000_to_2000 += 1,
            2000..=4999 => self.ms_2000_to_5000 += 1,
            _ => self.over_5000ms += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.under_100ms
            + self.ms_100_to_500
            + self.ms_500_to_1000
            + self.ms_1000_to_2000
            + self.ms_2000_to_5000
            + self.over_5000ms
    }

    /// Upper bound of the bucket holding the 95th percentile (approximate)
    pub fn percentile_95(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }

        let p95_index = (total * 95 + 99) / 100;
        let buckets = [
            (self.under_100ms, 99.5),
            (self.ms_100_to_500, 499.5),
            (self.ms_500_to_1000, 999.5),
            (self.ms_1000_to_2000, 1999.5),
            (self.ms_2000_to_5000, 4999.5),
        ];
        let mut cumulative = 0;
        for (count, bound) in buckets {
            cumulative += count;
            if cumulative >= p95_index {
                return bound;
            }
        }
        // Approximate for the open-ended bucket
        7500.0
    }
}

/// Counters for one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderMetrics {
    /// Calls made through the executor
    pub total_requests: u64,
    /// HTTP attempts, including retries
    pub total_attempts: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Calls refused by an open circuit
    pub rejected_requests: u64,
    pub avg_latency_ms: f64,
    pub histogram: LatencyHistogram,
    /// Failures by error code
    pub errors_by_code: HashMap<String, u64>,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl ProviderMetrics {
    fn record_attempt(&mut self, latency_ms: u64) {
        self.total_attempts += 1;
        self.avg_latency_ms = (self.avg_latency_ms * (self.total_attempts - 1) as f64
            + latency_ms as f64)
            / self.total_attempts as f64;
        self.histogram.record(latency_ms);
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let judged = self.successful_requests + self.failed_requests;
        if judged == 0 {
            100.0
        } else {
            (self.successful_requests as f64 / judged as f64) * 100.0
        }
    }
}

/// Snapshot of all providers for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub providers: HashMap<String, ProviderMetricsSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetricsSummary {
    pub total_requests: u64,
    pub total_attempts: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub histogram: LatencyHistogram,
    pub errors_by_code: HashMap<String, u64>,
}

/// Thread-safe registry of provider metrics
#[derive(Debug, Default)]
pub struct EngineMetrics {
    providers: DashMap<String, ProviderMetrics>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, provider: &str) {
        let mut entry = self.providers.entry(provider.to_string()).or_default();
        entry.total_requests += 1;
        entry.last_request_at = Some(Utc::now());
    }

    pub fn record_attempt(&self, provider: &str, latency_ms: u64) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .record_attempt(latency_ms);
    }

    pub fn record_success(&self, provider: &str) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .successful_requests += 1;
    }

    pub fn record_failure(&self, provider: &str, error_code: &str) {
        let mut entry = self.providers.entry(provider.to_string()).or_default();
        entry.failed_requests += 1;
        *entry.errors_by_code.entry(error_code.to_string()).or_insert(0) += 1;

        debug!(
            provider = provider,
            error_code = error_code,
            failed_requests = entry.failed_requests,
            "Recorded failed request"
        );
    }

    pub fn record_rejection(&self, provider: &str) {
        let mut entry = self.providers.entry(provider.to_string()).or_default();
        entry.rejected_requests += 1;
        *entry.errors_by_code.entry("CIRCUIT_OPEN".to_string()).or_insert(0) += 1;
    }

    pub fn provider(&self, provider: &str) -> Option<ProviderMetrics> {
        self.providers.get(provider).map(|m| m.clone())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let providers = self
            .providers
            .iter()
            .map(|entry| {
                let m = entry.value();
                (
                    entry.key().clone(),
                    ProviderMetricsSummary {
                        total_requests: m.total_requests,
                        total_attempts: m.total_attempts,
                        successful_requests: m.successful_requests,
                        failed_requests: m.failed_requests,
                        rejected_requests: m.rejected_requests,
                        success_rate: m.success_rate(),
                        avg_latency_ms: m.avg_latency_ms,
                        p95_latency_ms: m.histogram.percentile_95(),
                        histogram: m.histogram.clone(),
                        errors_by_code: m.errors_by_code.clone(),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            timestamp: Utc::now(),
            providers,
        }
    }

    /// Export metrics in Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let snapshot = self.snapshot();
        let mut names: Vec<&String> = snapshot.providers.keys().collect();
        names.sort();

        let mut output = String::new();
        output.push_str("# HELP numgate_provider_requests_total Calls made to a provider\n");
        output.push_str("# TYPE numgate_provider_requests_total counter\n");
        for name in &names {
            output.push_str(&format!(
                "numgate_provider_requests_total{{provider=\"{}\"}} {}\n",
                name, snapshot.providers[*name].total_requests
            ));
        }
        output.push('\n');

        output.push_str("# HELP numgate_provider_failures_total Failed provider calls\n");
        output.push_str("# TYPE numgate_provider_failures_total counter\n");
        for name in &names {
            output.push_str(&format!(
                "numgate_provider_failures_total{{provider=\"{}\"}} {}\n",
                name, snapshot.providers[*name].failed_requests
            ));
        }
        output.push('\n');

        output.push_str("# HELP numgate_provider_latency_seconds Average attempt latency\n");
        output.push_str("# TYPE numgate_provider_latency_seconds gauge\n");
        for name in &names {
            output.push_str(&format!(
                "numgate_provider_latency_seconds{{provider=\"{}\"}} {}\n",
                name,
                snapshot.providers[*name].avg_latency_ms / 1000.0
            ));
        }

        output
    }
}
