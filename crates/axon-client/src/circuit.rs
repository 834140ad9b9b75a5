//! Circuit breaker — per-endpoint failure bookkeeping and state machine
//!
//! One `EndpointHealth` entry per remote endpoint identity, owned exclusively
//! by the breaker and mutated only through its transition methods:
//!
//!   Closed → Open       after `failure_threshold` consecutive failures
//!   Open → HalfOpen     once `recovery_timeout` has elapsed since opening
//!   HalfOpen → Closed   after `success_threshold` consecutive successes
//!   HalfOpen → Open     on any failure, resetting the recovery clock
//!
//! While a circuit is open, `should_attempt` answers false and the caller
//! fails fast without touching the network. Half-open admits attempts
//! concurrently rather than gating on a single probe; the first failure
//! reopens immediately, so concurrent probes converge within one round-trip.

use axon_core::config::RetryPolicy;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::backoff;

/// State of one endpoint's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Failure/success bookkeeping for one endpoint.
#[derive(Debug)]
struct EndpointHealth {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }
}

/// Per-endpoint circuit breaker table.
///
/// All mutation happens inside the per-entry guard; transitions are logged
/// after the guard is dropped so no I/O ever runs under the lock.
pub struct CircuitBreaker {
    policy: RetryPolicy,
    endpoints: DashMap<String, EndpointHealth>,
}

impl CircuitBreaker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            endpoints: DashMap::new(),
        }
    }

    /// Whether a call against `endpoint` may go out right now.
    ///
    /// An open circuit whose recovery timeout has elapsed transitions to
    /// half-open here, admitting the probing attempt.
    pub fn should_attempt(&self, endpoint: &str) -> bool {
        let mut transitioned = false;
        let allowed = {
            let mut health = self.endpoints.entry(endpoint.to_string()).or_default();
            match health.state {
                CircuitState::Closed | CircuitState::HalfOpen => true,
                CircuitState::Open => {
                    let elapsed = health
                        .opened_at
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::MAX);
                    if elapsed >= self.policy.recovery_timeout() {
                        health.state = CircuitState::HalfOpen;
                        health.consecutive_successes = 0;
                        transitioned = true;
                        true
                    } else {
                        false
                    }
                }
            }
        };
        if transitioned {
            info!(endpoint = %endpoint, "circuit half-open, probing");
        }
        allowed
    }

    /// Record a successful attempt.
    pub fn record_success(&self, endpoint: &str) {
        let mut closed = false;
        {
            let mut health = self.endpoints.entry(endpoint.to_string()).or_default();
            health.consecutive_failures = 0;
            match health.state {
                CircuitState::HalfOpen => {
                    health.consecutive_successes += 1;
                    if health.consecutive_successes >= self.policy.success_threshold {
                        health.state = CircuitState::Closed;
                        health.opened_at = None;
                        health.consecutive_successes = 0;
                        closed = true;
                    }
                }
                CircuitState::Closed | CircuitState::Open => {}
            }
        }
        if closed {
            info!(endpoint = %endpoint, "circuit closed");
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self, endpoint: &str) {
        let mut opened_from = None;
        {
            let mut health = self.endpoints.entry(endpoint.to_string()).or_default();
            health.consecutive_successes = 0;
            health.consecutive_failures += 1;
            match health.state {
                CircuitState::Closed => {
                    if health.consecutive_failures >= self.policy.failure_threshold {
                        health.state = CircuitState::Open;
                        health.opened_at = Some(Instant::now());
                        opened_from = Some(CircuitState::Closed);
                    }
                }
                CircuitState::HalfOpen => {
                    health.state = CircuitState::Open;
                    health.opened_at = Some(Instant::now());
                    opened_from = Some(CircuitState::HalfOpen);
                }
                CircuitState::Open => {}
            }
        }
        if let Some(from) = opened_from {
            warn!(
                endpoint = %endpoint,
                from = %from,
                recovery_secs = self.policy.recovery_timeout,
                "circuit opened"
            );
        }
    }

    /// Delay before the next retry against `endpoint`.
    pub fn compute_backoff(&self, endpoint: &str) -> Duration {
        let failures = self
            .endpoints
            .get(endpoint)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0);
        backoff::delay(
            failures,
            self.policy.backoff_base(),
            self.policy.backoff_cap(),
            self.policy.jitter_fraction,
        )
    }

    /// Current state for one endpoint (Closed if never seen).
    pub fn state(&self, endpoint: &str) -> CircuitState {
        self.endpoints
            .get(endpoint)
            .map(|h| h.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Point-in-time view of every tracked endpoint, for diagnostics.
    pub fn snapshot(&self) -> HashMap<String, CircuitState> {
        self.endpoints
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(failure_threshold: u32, success_threshold: u32, recovery_secs: f64) -> RetryPolicy {
        RetryPolicy {
            failure_threshold,
            success_threshold,
            recovery_timeout: recovery_secs,
            jitter_fraction: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn opens_after_exactly_failure_threshold() {
        let breaker = CircuitBreaker::new(policy(3, 1, 30.0));
        breaker.record_failure("engine");
        breaker.record_failure("engine");
        assert_eq!(breaker.state("engine"), CircuitState::Closed);
        assert!(breaker.should_attempt("engine"));

        breaker.record_failure("engine");
        assert_eq!(breaker.state("engine"), CircuitState::Open);
        assert!(!breaker.should_attempt("engine"));
    }

    #[test]
    fn open_circuit_probes_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(policy(3, 1, 0.05));
        for _ in 0..3 {
            breaker.record_failure("engine");
        }
        assert!(!breaker.should_attempt("engine"));

        std::thread::sleep(Duration::from_millis(70));
        assert!(breaker.should_attempt("engine"));
        assert_eq!(breaker.state("engine"), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_failure_reopens_and_resets_clock() {
        let breaker = CircuitBreaker::new(policy(3, 1, 0.05));
        for _ in 0..3 {
            breaker.record_failure("engine");
        }
        std::thread::sleep(Duration::from_millis(70));
        assert!(breaker.should_attempt("engine"));

        // Probe fails: straight back to open, recovery clock restarted
        breaker.record_failure("engine");
        assert_eq!(breaker.state("engine"), CircuitState::Open);
        assert!(!breaker.should_attempt("engine"));

        std::thread::sleep(Duration::from_millis(70));
        assert!(breaker.should_attempt("engine"));
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(policy(3, 2, 0.05));
        for _ in 0..3 {
            breaker.record_failure("engine");
        }
        std::thread::sleep(Duration::from_millis(70));
        assert!(breaker.should_attempt("engine"));

        breaker.record_success("engine");
        assert_eq!(breaker.state("engine"), CircuitState::HalfOpen);
        breaker.record_success("engine");
        assert_eq!(breaker.state("engine"), CircuitState::Closed);
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let breaker = CircuitBreaker::new(policy(3, 1, 30.0));
        breaker.record_failure("engine");
        breaker.record_failure("engine");
        breaker.record_success("engine");
        // Two more failures are not enough to open after the reset
        breaker.record_failure("engine");
        breaker.record_failure("engine");
        assert_eq!(breaker.state("engine"), CircuitState::Closed);
    }

    #[test]
    fn backoff_tracks_consecutive_failures() {
        let mut p = policy(5, 1, 30.0);
        p.backoff_base = 1.0;
        p.backoff_cap = 60.0;
        let breaker = CircuitBreaker::new(p);

        assert_eq!(breaker.compute_backoff("engine"), Duration::from_secs(1));
        breaker.record_failure("engine");
        assert_eq!(breaker.compute_backoff("engine"), Duration::from_secs(2));
        breaker.record_failure("engine");
        assert_eq!(breaker.compute_backoff("engine"), Duration::from_secs(4));
        breaker.record_success("engine");
        assert_eq!(breaker.compute_backoff("engine"), Duration::from_secs(1));
    }

    #[test]
    fn endpoints_are_independent() {
        let breaker = CircuitBreaker::new(policy(3, 1, 30.0));
        for _ in 0..3 {
            breaker.record_failure("flaky");
        }
        assert!(!breaker.should_attempt("flaky"));
        assert!(breaker.should_attempt("healthy"));
        assert_eq!(breaker.state("healthy"), CircuitState::Closed);
    }
}
