// src/breaker/mod.rs

//! Per-dependency circuit breakers. Each guarded dependency gets its own
//! independent state machine; a failure in one never affects another.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected without attempting the call
    Open,
    /// Circuit allows a limited number of probes to test recovery
    HalfOpen,
}

/// Verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Pass through; `probe` marks half-open trial requests whose outcome
    /// decides the next transition
    Allow { probe: bool },
    Reject,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_transition: Instant,
    trials_in_flight: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub seconds_since_change: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_transition: Instant::now(),
                trials_in_flight: 0,
            }),
        }
    }

    /// Decide whether a request may pass. Synchronous and lock-only; the
    /// breaker never calls the dependency it guards.
    pub fn try_pass(&self) -> Decision {
        let mut inner = self.inner.lock().unwrap();

        if inner.state == CircuitState::Open {
            let elapsed_open = inner
                .opened_at
                .map(|t| t.elapsed() >= self.config.open_duration)
                .unwrap_or(false);
            if elapsed_open {
                inner.state = CircuitState::HalfOpen;
                inner.trials_in_flight = 0;
                inner.last_transition = Instant::now();
                debug!(dependency = %self.name, "circuit breaker half-open");
            }
        }

        match inner.state {
            CircuitState::Closed => Decision::Allow { probe: false },
            CircuitState::Open => Decision::Reject,
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_trials {
                    inner.trials_in_flight += 1;
                    Decision::Allow { probe: true }
                } else {
                    // Beyond the trial budget: reject rather than pile
                    // probes onto a recovering dependency
                    Decision::Reject
                }
            }
        }
    }

    /// Feed back the outcome of an allowed request. `probe` must be the flag
    /// returned by `try_pass` for that request.
    pub fn on_result(&self, success: bool, probe: bool) {
        let mut inner = self.inner.lock().unwrap();

        if probe {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::Closed => {
                if success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        inner.last_transition = Instant::now();
                        warn!(
                            dependency = %self.name,
                            failures = inner.consecutive_failures,
                            "circuit breaker opened"
                        );
                    }
                }
            }
            CircuitState::HalfOpen if probe => {
                if success {
                    // One successful probe is enough to close the circuit
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.trials_in_flight = 0;
                    inner.opened_at = None;
                    inner.last_transition = Instant::now();
                    info!(dependency = %self.name, "circuit breaker closed after probe success");
                } else {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.trials_in_flight = 0;
                    inner.last_transition = Instant::now();
                    warn!(dependency = %self.name, "circuit breaker re-opened after probe failure");
                }
            }
            // Late results from before a transition carry no signal
            _ => {}
        }
    }

    /// Operator override: force CLOSED and clear all counters. Safe to call
    /// repeatedly from any state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.trials_in_flight = 0;
        inner.opened_at = None;
        inner.last_transition = Instant::now();
        info!(dependency = %self.name, "circuit breaker manually reset");
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            dependency: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            seconds_since_change: inner.last_transition.elapsed().as_secs(),
        }
    }
}

/// All breakers for the process, built once at startup.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(configs: &[(String, BreakerConfig)]) -> Self {
        let breakers = configs
            .iter()
            .map(|(name, config)| {
                (
                    name.clone(),
                    Arc::new(CircuitBreaker::new(name.clone(), config.clone())),
                )
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, dependency: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(dependency)
    }

    /// Reset one breaker; false when the dependency is unknown.
    pub fn reset(&self, dependency: &str) -> bool {
        match self.breakers.get(dependency) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.values() {
            breaker.reset();
        }
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<BreakerSnapshot> =
            self.breakers.values().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        all
    }
}
