// src/tests/limiter_tests.rs

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{KeyStrategy, LoadConfig, RouteClass, RuleConfig};
use crate::error::AdmissionError;
use crate::gauge::LoadLevel;
use crate::limiter::{Charge, CounterStore, RateLimiterChain};
use crate::metrics::Outcome;

fn ip() -> IpAddr {
    "192.0.2.10".parse().unwrap()
}

fn rule(name: &str, window_secs: u64, quota: u64) -> RuleConfig {
    RuleConfig {
        name: name.to_string(),
        window: Duration::from_secs(window_secs),
        max_requests: quota,
        load_sensitive: false,
        skip_successful: false,
        skip_failed: false,
        key_strategy: KeyStrategy::Ip,
        route_class: None,
    }
}

#[tokio::test(start_paused = true)]
async fn chain_denies_past_quota_with_retry_after() {
    let chain = RateLimiterChain::new(vec![rule("general", 60, 3)], LoadConfig::default());

    for _ in 0..3 {
        chain
            .admit(ip(), None, RouteClass::Other, "/api/things", LoadLevel::Normal)
            .expect("under quota");
    }

    let err = chain
        .admit(ip(), None, RouteClass::Other, "/api/things", LoadLevel::Normal)
        .unwrap_err();
    match err {
        AdmissionError::QuotaExceeded { rule, retry_after } => {
            assert_eq!(rule, "general");
            assert!(retry_after <= Duration::from_secs(60));
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn first_denial_short_circuits_and_later_rules_stay_uncharged() {
    let chain = RateLimiterChain::new(
        vec![rule("burst", 10, 1), rule("general", 60, 100)],
        LoadConfig::default(),
    );

    chain
        .admit(ip(), None, RouteClass::Other, "/api/things", LoadLevel::Normal)
        .unwrap();
    chain
        .admit(ip(), None, RouteClass::Other, "/api/things", LoadLevel::Normal)
        .unwrap_err();

    // The denied request never reached the general rule
    assert_eq!(chain.store().count("general", "ip:192.0.2.10"), 1);
}

#[tokio::test(start_paused = true)]
async fn load_sensitive_quota_scales_down_under_high_load() {
    let mut sensitive = rule("general", 60, 100);
    sensitive.load_sensitive = true;
    let chain = RateLimiterChain::new(vec![sensitive], LoadConfig::default());

    // default high multiplier is 0.3 -> effective quota 30
    for i in 0..30 {
        chain
            .admit(ip(), None, RouteClass::Other, "/api/things", LoadLevel::High)
            .unwrap_or_else(|e| panic!("request {i} should pass: {e}"));
    }
    chain
        .admit(ip(), None, RouteClass::Other, "/api/things", LoadLevel::High)
        .unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn fixed_security_rules_ignore_load_level() {
    let mut auth = rule("auth", 900, 5);
    auth.route_class = Some(RouteClass::Auth);
    let chain = RateLimiterChain::new(vec![auth], LoadConfig::default());

    for _ in 0..5 {
        chain
            .admit(ip(), None, RouteClass::Auth, "/api/auth/login", LoadLevel::High)
            .expect("fixed rule keeps its base quota under load");
    }
    chain
        .admit(ip(), None, RouteClass::Auth, "/api/auth/login", LoadLevel::High)
        .unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn six_login_attempts_reject_the_sixth_with_window_retry() {
    let mut auth = rule("auth", 900, 5);
    auth.route_class = Some(RouteClass::Auth);
    let chain = RateLimiterChain::new(vec![auth], LoadConfig::default());

    for _ in 0..5 {
        chain
            .admit(ip(), None, RouteClass::Auth, "/api/auth/login", LoadLevel::Normal)
            .unwrap();
    }
    match chain
        .admit(ip(), None, RouteClass::Auth, "/api/auth/login", LoadLevel::Normal)
        .unwrap_err()
    {
        AdmissionError::QuotaExceeded { retry_after, .. } => {
            assert!(retry_after > Duration::from_secs(880));
            assert!(retry_after <= Duration::from_secs(900));
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn exempt_paths_are_never_counted() {
    let chain = RateLimiterChain::new(vec![rule("burst", 10, 1)], LoadConfig::default());

    for path in ["/health", "/health/detailed", "/ready", "/docs/api"] {
        for _ in 0..10 {
            let receipt = chain
                .admit(ip(), None, RouteClass::Other, path, LoadLevel::High)
                .expect("exempt paths bypass all counting");
            assert!(receipt.is_empty());
        }
    }
    assert!(chain.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn class_rules_only_apply_to_their_class() {
    let mut lead = rule("lead", 3600, 1);
    lead.route_class = Some(RouteClass::Lead);
    let chain = RateLimiterChain::new(vec![lead], LoadConfig::default());

    // Reads never touch the lead rule
    for _ in 0..5 {
        chain
            .admit(ip(), None, RouteClass::CmsRead, "/api/blogs", LoadLevel::Normal)
            .unwrap();
    }

    chain
        .admit(ip(), None, RouteClass::Lead, "/api/leads", LoadLevel::Normal)
        .unwrap();
    chain
        .admit(ip(), None, RouteClass::Lead, "/api/leads", LoadLevel::Normal)
        .unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn skip_successful_refunds_only_successes() {
    let mut auth = rule("auth", 900, 2);
    auth.skip_successful = true;
    auth.route_class = Some(RouteClass::Auth);
    let chain = RateLimiterChain::new(vec![auth], LoadConfig::default());

    // Successful logins are refunded, so they never exhaust the quota
    for _ in 0..5 {
        let receipt = chain
            .admit(ip(), None, RouteClass::Auth, "/api/auth/login", LoadLevel::Normal)
            .unwrap();
        chain.settle(receipt, Outcome::Success);
    }

    // Failed attempts stick
    for _ in 0..2 {
        let receipt = chain
            .admit(ip(), None, RouteClass::Auth, "/api/auth/login", LoadLevel::Normal)
            .unwrap();
        chain.settle(receipt, Outcome::ClientError);
    }
    chain
        .admit(ip(), None, RouteClass::Auth, "/api/auth/login", LoadLevel::Normal)
        .unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn identity_keyed_rule_separates_accounts_on_shared_ip() {
    let mut upload = rule("upload", 3600, 1);
    upload.key_strategy = KeyStrategy::IdentityOrIp;
    upload.route_class = Some(RouteClass::Upload);
    let chain = RateLimiterChain::new(vec![upload], LoadConfig::default());

    chain
        .admit(ip(), Some("alice"), RouteClass::Upload, "/api/uploads", LoadLevel::Normal)
        .unwrap();
    chain
        .admit(ip(), Some("bob"), RouteClass::Upload, "/api/uploads", LoadLevel::Normal)
        .expect("separate identity, separate quota");
    chain
        .admit(ip(), Some("alice"), RouteClass::Upload, "/api/uploads", LoadLevel::Normal)
        .unwrap_err();
}

#[test]
fn concurrent_charges_never_exceed_quota() {
    let store = Arc::new(CounterStore::new());
    let admitted = Arc::new(AtomicUsize::new(0));
    let quota = 100u64;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let admitted = Arc::clone(&admitted);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    if matches!(
                        store.try_charge("general", "shared", quota, Duration::from_secs(60)),
                        Charge::Charged
                    ) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // 400 attempts race on one key; lost updates would let extras through
    assert_eq!(admitted.load(Ordering::SeqCst), quota as usize);
}
