//! Resilient HTTP access to the external catalog source
//!
//! Every call goes through the source's circuit breaker and the shared
//! adaptive rate limiter, and is retried with jittered exponential backoff
//! when the failure is transient.

use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::services::circuit_breaker::CircuitBreakerRegistry;
use crate::domain::services::rate_limiter::AdaptiveRateLimiter;

use super::header_rotation::HeaderRotationPolicy;

/// A successful upstream response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub attempts: u32,
    pub latency_ms: u64,
}

/// Result of a lightweight reachability check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
    pub reachable: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct GatewayCounters {
    requests: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    total_latency_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub requests: u64,
    pub failures: u64,
    pub retries: u64,
    pub average_latency_ms: f64,
}

pub struct FetchGateway {
    client: Client,
    config: FetchConfig,
    limiter: Arc<AdaptiveRateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    headers: HeaderRotationPolicy,
    counters: GatewayCounters,
}

impl FetchGateway {
    pub fn new(
        config: FetchConfig,
        limiter: Arc<AdaptiveRateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> PipelineResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.ping_timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            headers: HeaderRotationPolicy::new(config.rotate_headers)
                .with_pool(config.user_agents.clone(), Vec::new()),
            config,
            limiter,
            breakers,
            counters: GatewayCounters::default(),
        })
    }

    pub fn with_header_policy(mut self, headers: HeaderRotationPolicy) -> Self {
        self.headers = headers;
        self
    }

    pub fn limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Fetch a page from `source`, retrying transient failures.
    ///
    /// Fails fast with [`PipelineError::CircuitOpen`] while the source's
    /// breaker is open. Client errors other than 429 are returned at once.
    pub async fn fetch(&self, url: &str, source: &str) -> PipelineResult<FetchResponse> {
        let breaker = self.breakers.get(source).await;
        let mut attempt: u32 = 0;

        loop {
            if !breaker.is_call_permitted().await {
                return Err(PipelineError::CircuitOpen {
                    source_name: source.to_string(),
                });
            }

            self.limiter.acquire().await;
            self.pre_request_pause().await;
            attempt += 1;

            match self.send(url, self.config.primary_timeout).await {
                Ok((status, body, latency_ms)) => {
                    breaker.on_success().await;
                    debug!(url = %url, source = %source, attempt, latency_ms, "Fetched page");
                    return Ok(FetchResponse {
                        url: url.to_string(),
                        status,
                        body,
                        attempts: attempt,
                        latency_ms,
                    });
                }
                Err(e) => {
                    // A 404 says nothing about the health of the source
                    if e.retryable() {
                        breaker.on_failure().await;
                    }
                    if !e.should_retry_fetch() || attempt >= self.config.max_attempts {
                        warn!(url = %url, source = %source, attempt, error = %e, "Fetch failed");
                        return Err(e);
                    }

                    let delay = self.retry_delay(attempt);
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        url = %url,
                        source = %source,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Single short-deadline request used by health checks. Does not consume
    /// rate limiter slots or move breaker state.
    pub async fn ping(&self, url: &str) -> PingResult {
        match self.send(url, self.config.ping_timeout).await {
            Ok((status, _, latency_ms)) => PingResult {
                reachable: true,
                status: Some(status),
                latency_ms,
                error: None,
            },
            Err(e) => PingResult {
                reachable: false,
                status: match &e {
                    PipelineError::Upstream { status, .. } => Some(*status),
                    _ => None,
                },
                latency_ms: 0,
                error: Some(e.to_string()),
            },
        }
    }

    /// Backoff before the retry following failed attempt number `attempt`
    /// (1-based): `min(base * multiplier^(attempt-1), max)`, then jittered.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.config.base_retry_delay.as_millis() as f64
            * self.config.retry_multiplier.powi(exponent);
        let capped = raw.min(self.config.max_retry_delay.as_millis() as f64);

        let jitter = self.config.retry_jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).round().max(0.0) as u64)
    }

    pub fn stats(&self) -> GatewayStats {
        let requests = self.counters.requests.load(Ordering::Relaxed);
        let total_latency = self.counters.total_latency_ms.load(Ordering::Relaxed);
        GatewayStats {
            requests,
            failures: self.counters.failures.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            average_latency_ms: if requests == 0 {
                0.0
            } else {
                total_latency as f64 / requests as f64
            },
        }
    }

    async fn pre_request_pause(&self) {
        let (low, high) = self.config.pre_request_jitter_ms;
        if high == 0 || high < low {
            return;
        }
        let pause = rand::thread_rng().gen_range(low..=high);
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }

    async fn send(&self, url: &str, deadline: Duration) -> PipelineResult<(u16, String, u64)> {
        let mut request = self.client.get(url).timeout(deadline);
        for (name, value) in self.headers.next_headers() {
            request = request.header(name, value);
        }

        let started = Instant::now();
        let result = Self::read_response(request, deadline).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }

        result.map(|(status, body)| (status, body, latency_ms))
    }

    async fn read_response(
        request: reqwest::RequestBuilder,
        deadline: Duration,
    ) -> PipelineResult<(u16, String)> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                PipelineError::timeout("upstream request", deadline)
            } else {
                PipelineError::network(e.to_string())
            }
        };

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status.as_u16()));
        }
        let body = response.text().await.map_err(classify)?;
        Ok((status.as_u16(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RateLimiterConfig};

    fn gateway(config: FetchConfig) -> FetchGateway {
        FetchGateway::new(
            config,
            Arc::new(AdaptiveRateLimiter::new(RateLimiterConfig::default())),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
        )
        .unwrap()
    }

    #[test]
    fn test_retry_delay_schedule_without_jitter() {
        let gw = gateway(FetchConfig {
            retry_jitter: 0.0,
            ..Default::default()
        });

        assert_eq!(gw.retry_delay(1), Duration::from_millis(2000));
        assert_eq!(gw.retry_delay(2), Duration::from_millis(3000));
        assert_eq!(gw.retry_delay(3), Duration::from_millis(4500));
        assert_eq!(gw.retry_delay(4), Duration::from_millis(6750));
        assert_eq!(gw.retry_delay(8), Duration::from_millis(15000));
    }

    #[test]
    fn test_retry_delay_jitter_bounds() {
        let gw = gateway(FetchConfig::default());
        for _ in 0..50 {
            let ms = gw.retry_delay(2).as_millis() as u64;
            assert!((2400..=3600).contains(&ms), "delay {} out of bounds", ms);
        }
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let gw = gateway(FetchConfig {
            pre_request_jitter_ms: (0, 0),
            ..Default::default()
        });
        let breaker = gw.breakers().get("catalog").await;
        for _ in 0..5 {
            breaker.on_failure().await;
        }

        let err = gw.fetch("http://127.0.0.1:9/never", "catalog").await.unwrap_err();
        assert!(matches!(err, PipelineError::CircuitOpen { .. }));
        assert!(err.retryable());
        assert_eq!(gw.stats().requests, 0);
    }

    #[tokio::test]
    async fn test_stats_start_empty() {
        let stats = gateway(FetchConfig::default()).stats();
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.average_latency_ms, 0.0);
    }
}
