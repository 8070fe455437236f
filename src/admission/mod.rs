// src/admission/mod.rs

//! The admission controller: degradation policy, limiter chain, and breaker
//! verdict, in that order. Every decision is computed from in-memory state;
//! nothing on this path blocks.

use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::breaker::{BreakerRegistry, CircuitBreaker, Decision};
use crate::config::{AdmissionConfig, DegradationRule, PriorityClass, RouteClass};
use crate::error::{AdmissionError, Result};
use crate::gauge::{LoadGauge, LoadLevel, MemoryLoadGauge};
use crate::limiter::{ChargeReceipt, LimiterSnapshot, RateLimiterChain};
use crate::metrics::{MetricRecorder, Outcome};

/// Everything the admission layer needs to know about an inbound request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub remote: IpAddr,
    pub forwarded_for: Option<String>,
    /// Authenticated identity, when the auth collaborator produced one
    pub identity: Option<String>,
    pub method: String,
    pub path: String,
}

/// Classify a request into a route class from its method and path.
pub fn classify(method: &str, path: &str) -> RouteClass {
    let is_write = matches!(method, "POST" | "PUT" | "PATCH" | "DELETE");

    if path.starts_with("/api/auth") {
        RouteClass::Auth
    } else if path.starts_with("/api/leads") && is_write {
        RouteClass::Lead
    } else if path.starts_with("/api/uploads") {
        RouteClass::Upload
    } else if ["/api/blogs", "/api/videos", "/api/faqs", "/api/trainers"]
        .iter()
        .any(|p| path.starts_with(p))
    {
        if is_write {
            RouteClass::CmsWrite
        } else {
            RouteClass::CmsRead
        }
    } else {
        RouteClass::Other
    }
}

/// The downstream dependency a route class relies on, if any.
fn guarded_dependency(class: RouteClass) -> Option<&'static str> {
    match class {
        RouteClass::Lead => Some("messaging"),
        RouteClass::Auth
        | RouteClass::Upload
        | RouteClass::CmsWrite
        | RouteClass::CmsRead
        | RouteClass::Other => Some("database"),
    }
}

/// Ordered shedding table: priority class to the minimum load level at which
/// requests of that class are rejected outright.
#[derive(Debug, Clone)]
pub struct DegradationPolicy {
    rules: Vec<DegradationRule>,
}

impl DegradationPolicy {
    pub fn new(rules: Vec<DegradationRule>) -> Self {
        Self { rules }
    }

    pub fn shed_at(&self, class: PriorityClass) -> Option<LoadLevel> {
        self.rules
            .iter()
            .find(|r| r.class == class)
            .and_then(|r| r.shed_at)
    }

    pub fn should_shed(&self, class: PriorityClass, level: LoadLevel) -> bool {
        match self.shed_at(class) {
            Some(min_level) => level >= min_level,
            None => false,
        }
    }
}

/// Handle returned for an admitted request. Feed it back through
/// [`AdmissionController::complete`] once the response status is known.
#[derive(Debug)]
pub struct AdmitTicket {
    receipt: ChargeReceipt,
    breaker: Option<(Arc<CircuitBreaker>, bool)>,
    started: Instant,
}

/// The orchestrating entry point in front of every API route. Explicitly
/// constructed and passed by handle into the request path; tests build
/// isolated instances with a fixed gauge.
#[derive(Debug)]
pub struct AdmissionController {
    chain: Arc<RateLimiterChain>,
    gauge: Arc<dyn LoadGauge>,
    breakers: BreakerRegistry,
    metrics: Arc<MetricRecorder>,
    policy: DegradationPolicy,
    trusted_proxy_hops: usize,
}

impl AdmissionController {
    /// Build a controller with the memory-pressure gauge wired to the
    /// metric recorder. Fails fast on invalid configuration.
    pub fn new(config: AdmissionConfig) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricRecorder::new(config.metric_capacity));
        let gauge = Arc::new(MemoryLoadGauge::new(
            config.load.clone(),
            Some(Arc::clone(&metrics)),
        ));
        Self::build(config, gauge, metrics)
    }

    /// Build a controller with an injected gauge (test double or an
    /// alternative load signal).
    pub fn with_gauge(config: AdmissionConfig, gauge: Arc<dyn LoadGauge>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricRecorder::new(config.metric_capacity));
        Self::build(config, gauge, metrics)
    }

    fn build(
        config: AdmissionConfig,
        gauge: Arc<dyn LoadGauge>,
        metrics: Arc<MetricRecorder>,
    ) -> Result<Self> {
        Ok(Self {
            chain: Arc::new(RateLimiterChain::new(
                config.rules.clone(),
                config.load.clone(),
            )),
            gauge,
            breakers: BreakerRegistry::new(&config.breakers),
            metrics,
            policy: DegradationPolicy::new(config.degradation.clone()),
            trusted_proxy_hops: config.trusted_proxy_hops,
        })
    }

    /// Decide whether to admit one request. Synchronous; rejections come
    /// back as structured errors and never reach business logic.
    pub fn should_admit(&self, req: &RequestInfo) -> Result<AdmitTicket> {
        let class = classify(&req.method, &req.path);
        let priority = class.priority();
        let level = self.gauge.current_level();

        // Degradation runs before the chain so low-priority work is shed
        // without consuming limiter bookkeeping
        if self.policy.should_shed(priority, level) {
            debug!(path = %req.path, class = ?class, level = ?level, "request shed");
            return Err(AdmissionError::LoadShed {
                level,
                class: format!("{priority:?}").to_lowercase(),
            });
        }

        let ip = crate::limiter::client_ip(
            req.remote,
            req.forwarded_for.as_deref(),
            self.trusted_proxy_hops,
        );
        let receipt = self
            .chain
            .admit(ip, req.identity.as_deref(), class, &req.path, level)?;

        let breaker = match guarded_dependency(class).and_then(|dep| self.breakers.get(dep)) {
            Some(breaker) => match breaker.try_pass() {
                Decision::Allow { probe } => Some((Arc::clone(breaker), probe)),
                Decision::Reject => {
                    // The admitted charges stand; the request still consumed
                    // its slice of quota before hitting the open circuit
                    self.chain.settle(receipt, Outcome::ServerError);
                    return Err(AdmissionError::DependencyUnavailable {
                        dependency: breaker.snapshot().dependency,
                    });
                }
            },
            None => None,
        };

        Ok(AdmitTicket {
            receipt,
            breaker,
            started: Instant::now(),
        })
    }

    /// Close the loop for an admitted request once the response status is
    /// known: record the metric sample, settle outcome-conditional limiter
    /// charges, and feed the breaker.
    pub fn complete(&self, ticket: AdmitTicket, status: u16) {
        let latency = ticket.started.elapsed();
        self.metrics.record_status(status, latency);

        let outcome = Outcome::from_status(status);
        self.chain.settle(ticket.receipt, outcome);

        if let Some((breaker, probe)) = ticket.breaker {
            // Only 5xx marks the dependency as failing; 4xx is the caller's
            breaker.on_result(outcome != Outcome::ServerError, probe);
        }
    }

    pub fn current_level(&self) -> LoadLevel {
        self.gauge.current_level()
    }

    pub fn metrics(&self) -> &Arc<MetricRecorder> {
        &self.metrics
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn limiter_snapshot(&self) -> LimiterSnapshot {
        self.chain.snapshot(self.gauge.current_level())
    }

    pub fn chain(&self) -> &Arc<RateLimiterChain> {
        &self.chain
    }
}
