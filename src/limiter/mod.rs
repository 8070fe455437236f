// src/limiter/mod.rs

//! The rate limiter chain: an ordered list of independent fixed-window
//! limiters, each keyed by client identity, evaluated in sequence. The first
//! rule that denies short-circuits the chain; later rules are not charged.

mod client_key;
mod store;

pub use client_key::{client_ip, ClientKey};
pub use store::{Charge, CounterStore};

use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{LoadConfig, RouteClass, RuleConfig};
use crate::error::{AdmissionError, Result};
use crate::gauge::LoadLevel;
use crate::metrics::Outcome;

/// Paths that bypass all counting on every rule, at any load level.
const EXEMPT_PREFIXES: &[&str] = &["/health", "/ready", "/docs"];

fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Record of the rules a request was charged against, so outcome-conditional
/// rules can be refunded once the response status is known.
#[derive(Debug, Default)]
pub struct ChargeReceipt {
    charges: Vec<(usize, ClientKey)>,
}

impl ChargeReceipt {
    pub fn is_empty(&self) -> bool {
        self.charges.is_empty()
    }
}

/// Read-only view of one rule for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSnapshot {
    pub name: String,
    pub window_secs: u64,
    pub base_quota: u64,
    pub effective_quota: u64,
    pub load_sensitive: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterSnapshot {
    pub rules: Vec<RuleSnapshot>,
    pub active_slots: usize,
}

#[derive(Debug)]
pub struct RateLimiterChain {
    rules: Vec<RuleConfig>,
    load: LoadConfig,
    store: CounterStore,
}

impl RateLimiterChain {
    pub fn new(rules: Vec<RuleConfig>, load: LoadConfig) -> Self {
        Self {
            rules,
            load,
            store: CounterStore::new(),
        }
    }

    /// Effective quota for a rule at the given load level. Only rules marked
    /// load-sensitive shrink; fixed-security rules keep their base quota so
    /// brute-force protection never weakens under load.
    fn effective_quota(&self, rule: &RuleConfig, level: LoadLevel) -> u64 {
        if rule.load_sensitive {
            (rule.max_requests as f64 * self.load.multiplier(level)).round() as u64
        } else {
            rule.max_requests
        }
    }

    fn applies(rule: &RuleConfig, class: RouteClass) -> bool {
        match rule.route_class {
            None => true,
            Some(bound) => bound == class,
        }
    }

    /// Run the chain for one request. Every passing applicable rule is
    /// charged one unit; the receipt lets `settle` refund the rules that
    /// skip counting a particular outcome.
    pub fn admit(
        &self,
        ip: IpAddr,
        identity: Option<&str>,
        class: RouteClass,
        path: &str,
        level: LoadLevel,
    ) -> Result<ChargeReceipt> {
        if is_exempt(path) {
            return Ok(ChargeReceipt::default());
        }

        let mut receipt = ChargeReceipt::default();

        for (idx, rule) in self.rules.iter().enumerate() {
            if !Self::applies(rule, class) {
                continue;
            }

            let key = ClientKey::derive(rule.key_strategy, ip, identity);
            let quota = self.effective_quota(rule, level);

            match self
                .store
                .try_charge(&rule.name, key.as_str(), quota, rule.window)
            {
                Charge::Charged => receipt.charges.push((idx, key)),
                Charge::Denied { retry_after } => {
                    debug!(
                        rule = %rule.name,
                        client_key = %key,
                        quota,
                        level = ?level,
                        "rate limit denied"
                    );
                    return Err(AdmissionError::QuotaExceeded {
                        rule: rule.name.clone(),
                        retry_after,
                    });
                }
            }
        }

        Ok(receipt)
    }

    /// Second phase of the admit contract: refund rules configured to skip
    /// the outcome the request ended with.
    pub fn settle(&self, receipt: ChargeReceipt, outcome: Outcome) {
        for (idx, key) in receipt.charges {
            let rule = &self.rules[idx];
            let refund = match outcome {
                Outcome::Success => rule.skip_successful,
                Outcome::ClientError | Outcome::ServerError => rule.skip_failed,
            };
            if refund {
                self.store.refund(&rule.name, key.as_str());
            }
        }
    }

    pub fn snapshot(&self, level: LoadLevel) -> LimiterSnapshot {
        LimiterSnapshot {
            rules: self
                .rules
                .iter()
                .map(|rule| RuleSnapshot {
                    name: rule.name.clone(),
                    window_secs: rule.window.as_secs(),
                    base_quota: rule.max_requests,
                    effective_quota: self.effective_quota(rule, level),
                    load_sensitive: rule.load_sensitive,
                })
                .collect(),
            active_slots: self.store.len(),
        }
    }

    /// Periodically drop counters whose window closed with no further
    /// activity. Complements the lazy reset on access.
    pub fn spawn_sweeper(
        chain: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                chain.store.sweep();
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &CounterStore {
        &self.store
    }
}
