use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use crate::config::CircuitBreakerConfig;

/// Circuit breaker states following the standard pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, all requests fail immediately
    Open,
    /// Circuit is half-open, testing if the source recovered
    HalfOpen,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
    last_state_change: Instant,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            last_failure_at: None,
            last_state_change: Instant::now(),
        }
    }

    fn transition(&mut self, name: &str, to: CircuitState) {
        if self.state != to {
            info!(source = %name, from = ?self.state, to = ?to, "Circuit breaker transition");
            self.state = to;
            self.last_state_change = Instant::now();
        }
    }
}

/// Circuit breaker guarding one upstream source.
///
/// - **Closed**: failures accumulate; each success pays one failure back
/// - **Open**: calls fail fast until the cooldown since the last failure passes
/// - **Half-Open**: calls flow; enough successes close, any failure reopens
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitBreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Check if the circuit allows a call, moving OPEN to HALF_OPEN once the
    /// cooldown has elapsed.
    pub async fn is_call_permitted(&self) -> bool {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = state
                    .last_failure_at
                    .map(|t| t.elapsed() > self.config.cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    state.half_open_successes = 0;
                    state.transition(&self.name, CircuitState::HalfOpen);
                }
                cooled_down
            }
        }
    }

    /// Record a successful call
    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.half_open_success_threshold {
                    state.consecutive_failures = 0;
                    state.half_open_successes = 0;
                    state.transition(&self.name, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                state.consecutive_failures = state.consecutive_failures.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub async fn on_failure(&self) {
        let mut state = self.state.lock().await;
        state.last_failure_at = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        source = %self.name,
                        failures = state.consecutive_failures,
                        "Opening circuit breaker"
                    );
                    state.transition(&self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_successes = 0;
                state.transition(&self.name, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.lock().await;
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            half_open_successes: state.half_open_successes,
            ms_since_last_failure: state.last_failure_at.map(|t| t.elapsed().as_millis() as u64),
            ms_in_current_state: state.last_state_change.elapsed().as_millis() as u64,
        }
    }
}

/// Point-in-time view of a breaker, safe to serialize into status responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub ms_since_last_failure: Option<u64>,
    pub ms_in_current_state: u64,
}

/// Breakers keyed by upstream source name, created on first use
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, source: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(source, self.config.clone())))
            .clone()
    }

    pub async fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.lock().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
