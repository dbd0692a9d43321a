//! Request executor
//!
//! Every outbound provider call goes through [`Executor::execute`]:
//!
//! 1. the provider's circuit breaker admits or rejects the call without I/O
//! 2. a rate-limit slot is reserved and waited for
//! 3. up to `max_attempts` attempts run sequentially, each bounded by the
//!    attempt timeout, with backoff chosen by [`RetryDecision`]
//! 4. every attempt's latency feeds the breaker's quarantine window
//! 5. the response handler's result is reported back to the breaker

pub mod breaker;
pub mod rate_limit;
pub mod request;
pub mod retry;
pub mod trace;
pub mod transport;

pub use breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState, LatencyWindow};
pub use rate_limit::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
pub use request::{args, build_request, CallArgs};
pub use retry::{RetryDecision, RetryPolicy};
pub use trace::RequestTrace;
pub use transport::{
    HttpRequest, HttpTransport, RawResponse, ReqwestTransport, TransportError, TransportErrorKind,
};

use dashmap::DashMap;
use numgate_shared::ProviderConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::config::HttpConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics::EngineMetrics;

/// Executes provider requests with breaking, rate limiting and retries
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<dyn RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<EngineMetrics>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    traces: DashMap<String, RequestTrace>,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiter: Arc<dyn RateLimiter>,
        breakers: Arc<BreakerRegistry>,
        metrics: Arc<EngineMetrics>,
        config: &HttpConfig,
    ) -> Self {
        Self {
            transport,
            limiter,
            breakers,
            metrics,
            policy: RetryPolicy::from_config(config),
            attempt_timeout: Duration::from_secs(config.request_timeout_secs),
            traces: DashMap::new(),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Last request/response pair sent to `provider`, with credentials masked
    pub fn last_trace(&self, provider: &str) -> Option<RequestTrace> {
        self.traces.get(provider).map(|trace| trace.clone())
    }

    /// Send `request` and hand the final response to `handle`
    ///
    /// The handler runs inside the breaker so that classified provider faults
    /// count against the provider's health.
    #[instrument(skip(self, provider, request, handle), fields(provider = %provider.name))]
    pub async fn execute<T, F>(
        &self,
        provider: &ProviderConfig,
        endpoint: &str,
        request: HttpRequest,
        handle: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(RawResponse) -> EngineResult<T> + Send,
    {
        let name = provider.name.as_str();
        self.metrics.record_request(name);

        let breaker = self.breakers.get(name);
        if !breaker.try_acquire() {
            self.metrics.record_rejection(name);
            debug!(provider = name, endpoint, "Circuit open, rejecting call");
            return Err(EngineError::circuit_open(name));
        }

        rate_limit::acquire(self.limiter.as_ref(), name, provider.rate_limit_ms).await;

        let mut trace = RequestTrace::new(name, endpoint, &request);
        let result = self
            .send_with_retry(name, &request, &breaker, &mut trace)
            .await
            .and_then(handle);

        match result {
            Ok(_) => {
                breaker.on_success();
                self.metrics.record_success(name);
            }
            Err(ref e) => {
                if e.affects_health() {
                    breaker.on_failure();
                } else if matches!(e, EngineError::Provider(_)) {
                    // The provider answered coherently
                    breaker.on_success();
                } else {
                    breaker.on_neutral();
                }
                self.metrics.record_failure(name, e.error_code());
                if trace.error.is_none() {
                    trace.record_error(&e.to_string());
                }
            }
        }
        self.traces.insert(name.to_string(), trace);

        result
    }

    async fn send_with_retry(
        &self,
        provider: &str,
        request: &HttpRequest,
        breaker: &CircuitBreaker,
        trace: &mut RequestTrace,
    ) -> EngineResult<RawResponse> {
        let max_attempts = self.policy.max_attempts.max(1);
        let timeout_ms = self.attempt_timeout.as_millis() as u64;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let (result, latency_ms) =
                match tokio::time::timeout(self.attempt_timeout, self.transport.send(request)).await {
                    Ok(result) => (result, started.elapsed().as_millis() as u64),
                    Err(_) => (
                        Err(TransportError::new(
                            TransportErrorKind::Timeout,
                            format!("no response within {}ms", timeout_ms),
                        )),
                        timeout_ms,
                    ),
                };

            self.metrics.record_attempt(provider, latency_ms);
            let quarantined = breaker.record_latency(latency_ms);
            trace.record_attempt(attempt, latency_ms);

            let decision = match result {
                Ok(ref response) => {
                    trace.record_response(response.status, &response.body);
                    RetryDecision::for_response(response)
                }
                Err(ref e) => {
                    trace.record_error(&e.to_string());
                    RetryDecision::for_error(e)
                }
            };

            debug!(provider, attempt, latency_ms, ?decision, "Provider attempt finished");

            if !decision.should_retry() {
                return match result {
                    Ok(mut response) => {
                        response.attempts = attempt;
                        Ok(response)
                    }
                    Err(e) => Err(EngineError::transport(provider, None, attempt, e.message)),
                };
            }

            if attempt >= max_attempts || quarantined {
                return Err(exhausted(provider, attempt, result, self.attempt_timeout));
            }

            let delay = self.policy.delay(decision, attempt);
            warn!(
                provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying provider request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn exhausted(
    provider: &str,
    attempts: u32,
    last: Result<RawResponse, TransportError>,
    timeout: Duration,
) -> EngineError {
    match last {
        Ok(response) => EngineError::transport(
            provider,
            Some(response.status),
            attempts,
            format!("HTTP {}", response.status),
        ),
        Err(e) if e.kind == TransportErrorKind::Timeout => {
            EngineError::timeout(provider, timeout.as_secs().max(1))
        }
        Err(e) => EngineError::transport(provider, None, attempts, e.message),
    }
}
