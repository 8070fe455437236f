// src/tests/breaker_tests.rs

use std::time::Duration;
use tracing_test::traced_test;

use crate::breaker::{BreakerRegistry, CircuitBreaker, CircuitState, Decision};
use crate::config::BreakerConfig;

fn config() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        open_duration: Duration::from_secs(30),
        half_open_trials: 2,
    }
}

fn fail_times(breaker: &CircuitBreaker, n: u32) {
    for _ in 0..n {
        assert!(matches!(breaker.try_pass(), Decision::Allow { .. }));
        breaker.on_result(false, false);
    }
}

#[tokio::test(start_paused = true)]
async fn trips_open_after_consecutive_failures() {
    let breaker = CircuitBreaker::new("database", config());

    fail_times(&breaker, 3);
    assert_eq!(breaker.state(), CircuitState::Open);

    // The very next request is rejected without the call being attempted
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(breaker.try_pass(), Decision::Reject);
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_consecutive_counter() {
    let breaker = CircuitBreaker::new("database", config());

    fail_times(&breaker, 2);
    breaker.try_pass();
    breaker.on_result(true, false);
    // Two more failures are not enough anymore
    fail_times(&breaker, 2);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn open_duration_elapse_allows_exactly_the_trial_budget() {
    let breaker = CircuitBreaker::new("database", config());
    fail_times(&breaker, 3);

    tokio::time::advance(Duration::from_secs(31)).await;

    assert_eq!(breaker.try_pass(), Decision::Allow { probe: true });
    assert_eq!(breaker.try_pass(), Decision::Allow { probe: true });
    // Third concurrent request exceeds the two-probe budget
    assert_eq!(breaker.try_pass(), Decision::Reject);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn single_probe_success_closes_and_clears_failures() {
    let breaker = CircuitBreaker::new("database", config());
    fail_times(&breaker, 3);
    tokio::time::advance(Duration::from_secs(31)).await;

    assert_eq!(breaker.try_pass(), Decision::Allow { probe: true });
    breaker.on_result(true, true);

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().consecutive_failures, 0);
    assert!(matches!(breaker.try_pass(), Decision::Allow { probe: false }));
}

#[tokio::test(start_paused = true)]
async fn probe_failure_reopens_and_restarts_the_timer() {
    let breaker = CircuitBreaker::new("database", config());
    fail_times(&breaker, 3);
    tokio::time::advance(Duration::from_secs(31)).await;

    assert_eq!(breaker.try_pass(), Decision::Allow { probe: true });
    breaker.on_result(false, true);
    assert_eq!(breaker.state(), CircuitState::Open);

    // Timer restarted: still open 20s later, half-open after the full wait
    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(breaker.try_pass(), Decision::Reject);
    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(breaker.try_pass(), Decision::Allow { probe: true });
}

#[tokio::test(start_paused = true)]
async fn manual_reset_is_idempotent_from_any_state() {
    let breaker = CircuitBreaker::new("database", config());

    // From closed
    breaker.reset();
    assert_eq!(breaker.state(), CircuitState::Closed);

    // From open
    fail_times(&breaker, 3);
    breaker.reset();
    breaker.reset();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().consecutive_failures, 0);

    // From half-open
    fail_times(&breaker, 3);
    tokio::time::advance(Duration::from_secs(31)).await;
    breaker.try_pass();
    breaker.reset();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[traced_test]
#[tokio::test(start_paused = true)]
async fn trip_and_reset_transitions_are_logged() {
    let breaker = CircuitBreaker::new("database", config());

    fail_times(&breaker, 3);
    assert!(logs_contain("circuit breaker opened"));

    breaker.reset();
    assert!(logs_contain("circuit breaker manually reset"));
}

#[tokio::test(start_paused = true)]
async fn breakers_are_independent_per_dependency() {
    let registry = BreakerRegistry::new(&[
        ("database".to_string(), config()),
        ("messaging".to_string(), config()),
    ]);

    let database = registry.get("database").unwrap();
    fail_times(database, 3);

    assert_eq!(database.state(), CircuitState::Open);
    assert_eq!(
        registry.get("messaging").unwrap().state(),
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn registry_reset_targets_one_or_all() {
    let registry = BreakerRegistry::new(&[
        ("database".to_string(), config()),
        ("messaging".to_string(), config()),
    ]);
    fail_times(registry.get("database").unwrap(), 3);
    fail_times(registry.get("messaging").unwrap(), 3);

    assert!(registry.reset("database"));
    assert_eq!(registry.get("database").unwrap().state(), CircuitState::Closed);
    assert_eq!(registry.get("messaging").unwrap().state(), CircuitState::Open);
    assert!(!registry.reset("queue"));

    registry.reset_all();
    assert_eq!(registry.get("messaging").unwrap().state(), CircuitState::Closed);
}
