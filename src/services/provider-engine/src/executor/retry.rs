//! Retry decisions for outbound provider calls

use rand::Rng;
use std::time::Duration;

use super::transport::{RawResponse, TransportError};
use crate::config::HttpConfig;

/// Backoff strategy selected for one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the outcome to the caller
    Done,
    /// Wait exactly this long (from `Retry-After`)
    RetryAfter(Duration),
    /// Delay grows linearly with the attempt number
    Linear,
    /// Delay doubles with each attempt, with jitter
    Exponential,
}

impl RetryDecision {
    /// Decide from an HTTP response
    pub fn for_response(response: &RawResponse) -> Self {
        match response.status {
            429 => response
                .header("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| RetryDecision::RetryAfter(Duration::from_secs(secs)))
                .unwrap_or(RetryDecision::Exponential),
            s if s >= 500 => RetryDecision::Linear,
            _ => RetryDecision::Done,
        }
    }

    /// Decide from a transport failure
    pub fn for_error(error: &TransportError) -> Self {
        if error.kind.is_transient() {
            RetryDecision::Exponential
        } else {
            RetryDecision::Done
        }
    }

    pub fn should_retry(&self) -> bool {
        !matches!(self, RetryDecision::Done)
    }
}

/// Attempt ceiling and backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            jitter: true,
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay(&self, decision: RetryDecision, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = match decision {
            RetryDecision::Done => return Duration::ZERO,
            RetryDecision::RetryAfter(wait) => return wait.min(self.max_delay),
            RetryDecision::Linear => base_ms * attempt as f64,
            RetryDecision::Exponential => {
                let mut delay = base_ms * 2f64.powi(attempt.saturating_sub(1) as i32);
                if self.jitter {
                    // ±25%
                    let mut rng = rand::thread_rng();
                    delay *= rng.gen_range(0.75..=1.25);
                }
                delay
            }
        };

        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}
