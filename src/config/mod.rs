// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{AdmissionError, Result};
use crate::gauge::LoadLevel;

/// Route classes recognized by the admission layer. Derived from the request
/// path/method, they select the class-specific limiter rule and the priority
/// class used by the degradation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    /// Login / token endpoints
    Auth,
    /// Public lead-submission form posts
    Lead,
    /// Media uploads
    Upload,
    /// Content writes (blogs, videos, FAQs, trainers)
    CmsWrite,
    /// Content reads
    CmsRead,
    /// Anything else under the API surface
    Other,
}

/// Priority classes for load shedding, least sheddable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// Writes and auth: shed last, if ever
    Write,
    /// Reads: sheddable under high load
    Read,
    /// Bulk work (uploads): first to go
    Bulk,
}

impl RouteClass {
    pub fn priority(self) -> PriorityClass {
        match self {
            RouteClass::Auth | RouteClass::Lead | RouteClass::CmsWrite => PriorityClass::Write,
            RouteClass::CmsRead | RouteClass::Other => PriorityClass::Read,
            RouteClass::Upload => PriorityClass::Bulk,
        }
    }
}

/// How a rule derives its counting key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Count against the client IP (default)
    #[default]
    Ip,
    /// Count against the authenticated identity, falling back to IP
    IdentityOrIp,
}

/// Configuration for one limiter rule. Immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule identity, e.g. "auth" or "burst"
    pub name: String,

    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Base request quota per window, before load scaling
    pub max_requests: u64,

    /// Whether the quota shrinks under load. Security-critical rules
    /// (auth, lead anti-spam) stay fixed so protection never weakens.
    #[serde(default)]
    pub load_sensitive: bool,

    /// Refund the charge once the response turns out successful (2xx/3xx)
    #[serde(default)]
    pub skip_successful: bool,

    /// Refund the charge once the response turns out failed (4xx/5xx)
    #[serde(default)]
    pub skip_failed: bool,

    #[serde(default)]
    pub key_strategy: KeyStrategy,

    /// When set, the rule only applies to requests of this route class.
    /// Unset rules (burst, general) apply to every request.
    #[serde(default)]
    pub route_class: Option<RouteClass>,
}

/// Configuration for the memory-pressure load gauge and quota scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Memory ceiling the usage fraction is computed against
    pub memory_ceiling_bytes: u64,

    /// Usage fraction at which the level becomes Medium
    #[serde(default = "default_medium_fraction")]
    pub medium_fraction: f64,

    /// Usage fraction at which the level becomes High (must exceed medium)
    #[serde(default = "default_high_fraction")]
    pub high_fraction: f64,

    /// Quota multiplier applied to load-sensitive rules at Medium
    #[serde(default = "default_medium_multiplier")]
    pub medium_multiplier: f64,

    /// Quota multiplier applied to load-sensitive rules at High
    #[serde(default = "default_high_multiplier")]
    pub high_multiplier: f64,

    /// When set, a recent server-error rate above this fraction raises the
    /// sampled level one step.
    #[serde(default)]
    pub error_rate_bump: Option<f64>,
}

fn default_medium_fraction() -> f64 {
    0.70
}

fn default_high_fraction() -> f64 {
    0.85
}

fn default_medium_multiplier() -> f64 {
    0.6
}

fn default_high_multiplier() -> f64 {
    0.3
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_bytes: 512 * 1024 * 1024,
            medium_fraction: default_medium_fraction(),
            high_fraction: default_high_fraction(),
            medium_multiplier: default_medium_multiplier(),
            high_multiplier: default_high_multiplier(),
            error_rate_bump: None,
        }
    }
}

impl LoadConfig {
    /// Quota multiplier for a load-sensitive rule at the given level.
    pub fn multiplier(&self, level: LoadLevel) -> f64 {
        match level {
            LoadLevel::Normal => 1.0,
            LoadLevel::Medium => self.medium_multiplier,
            LoadLevel::High => self.high_multiplier,
        }
    }
}

/// Configuration for one circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before allowing probes
    #[serde(with = "duration_serde")]
    pub open_duration: Duration,

    /// Max concurrent probes while half-open
    #[serde(default = "default_half_open_trials")]
    pub half_open_trials: u32,
}

fn default_half_open_trials() -> u32 {
    3
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_trials: default_half_open_trials(),
        }
    }
}

/// One entry of the degradation policy: requests of `class` are shed once the
/// load level reaches `shed_at`. `None` means the class is never shed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationRule {
    pub class: PriorityClass,
    pub shed_at: Option<LoadLevel>,
}

/// Top-level admission-layer configuration. Static at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Limiter rules in evaluation order (burst first, then general, then
    /// the route-class-specific rules)
    pub rules: Vec<RuleConfig>,

    #[serde(default)]
    pub load: LoadConfig,

    /// Downstream dependencies guarded by a breaker, with their settings
    #[serde(default)]
    pub breakers: Vec<(String, BreakerConfig)>,

    #[serde(default = "default_degradation")]
    pub degradation: Vec<DegradationRule>,

    /// Number of trusted reverse-proxy hops in front of the process.
    /// Forwarding headers beyond this count are ignored.
    #[serde(default)]
    pub trusted_proxy_hops: usize,

    /// Maximum samples held by the metric ring buffer
    #[serde(default = "default_metric_capacity")]
    pub metric_capacity: usize,
}

fn default_metric_capacity() -> usize {
    2_048
}

fn default_degradation() -> Vec<DegradationRule> {
    vec![
        DegradationRule {
            class: PriorityClass::Write,
            shed_at: None,
        },
        DegradationRule {
            class: PriorityClass::Read,
            shed_at: Some(LoadLevel::High),
        },
        DegradationRule {
            class: PriorityClass::Bulk,
            shed_at: Some(LoadLevel::Medium),
        },
    ]
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            load: LoadConfig::default(),
            breakers: vec![
                ("database".to_string(), BreakerConfig::default()),
                ("messaging".to_string(), BreakerConfig::default()),
            ],
            degradation: default_degradation(),
            trusted_proxy_hops: 0,
            metric_capacity: default_metric_capacity(),
        }
    }
}

/// The stock rule set guarding the CRM API surface.
fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig {
            name: "burst".to_string(),
            window: Duration::from_secs(10),
            max_requests: 20,
            load_sensitive: true,
            skip_successful: false,
            skip_failed: false,
            key_strategy: KeyStrategy::Ip,
            route_class: None,
        },
        RuleConfig {
            name: "general".to_string(),
            window: Duration::from_secs(15 * 60),
            max_requests: 300,
            load_sensitive: true,
            skip_successful: false,
            skip_failed: false,
            key_strategy: KeyStrategy::Ip,
            route_class: None,
        },
        RuleConfig {
            name: "auth".to_string(),
            window: Duration::from_secs(15 * 60),
            max_requests: 5,
            load_sensitive: false,
            skip_successful: true,
            skip_failed: false,
            key_strategy: KeyStrategy::Ip,
            route_class: Some(RouteClass::Auth),
        },
        RuleConfig {
            name: "lead".to_string(),
            window: Duration::from_secs(60 * 60),
            max_requests: 10,
            load_sensitive: false,
            skip_successful: false,
            skip_failed: false,
            key_strategy: KeyStrategy::Ip,
            route_class: Some(RouteClass::Lead),
        },
        RuleConfig {
            name: "upload".to_string(),
            window: Duration::from_secs(60 * 60),
            max_requests: 20,
            load_sensitive: true,
            skip_successful: false,
            skip_failed: false,
            key_strategy: KeyStrategy::IdentityOrIp,
            route_class: Some(RouteClass::Upload),
        },
        RuleConfig {
            name: "cms_write".to_string(),
            window: Duration::from_secs(15 * 60),
            max_requests: 60,
            load_sensitive: true,
            skip_successful: false,
            skip_failed: false,
            key_strategy: KeyStrategy::IdentityOrIp,
            route_class: Some(RouteClass::CmsWrite),
        },
    ]
}

impl AdmissionConfig {
    /// Validate the configuration. Called once at startup; any error here is
    /// fatal and the process must not start accepting traffic.
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(AdmissionError::Config("no limiter rules defined".into()));
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.name.is_empty() {
                return Err(AdmissionError::Config("rule with empty name".into()));
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(AdmissionError::Config(format!(
                    "duplicate rule name '{}'",
                    rule.name
                )));
            }
            if rule.max_requests == 0 {
                return Err(AdmissionError::Config(format!(
                    "rule '{}' has zero quota",
                    rule.name
                )));
            }
            if rule.window.is_zero() {
                return Err(AdmissionError::Config(format!(
                    "rule '{}' has zero window",
                    rule.name
                )));
            }
            if rule.skip_successful && rule.skip_failed {
                return Err(AdmissionError::Config(format!(
                    "rule '{}' skips both outcomes and would never count",
                    rule.name
                )));
            }
        }

        for mult in [self.load.medium_multiplier, self.load.high_multiplier] {
            if !(mult > 0.0 && mult <= 1.0) {
                return Err(AdmissionError::Config(format!(
                    "load multiplier {mult} outside (0, 1]"
                )));
            }
        }
        if self.load.medium_fraction >= self.load.high_fraction {
            return Err(AdmissionError::Config(
                "memory thresholds must be ascending (medium < high)".into(),
            ));
        }
        if self.load.memory_ceiling_bytes == 0 {
            return Err(AdmissionError::Config("memory ceiling is zero".into()));
        }

        for (name, breaker) in &self.breakers {
            if name.is_empty() {
                return Err(AdmissionError::Config("breaker with empty name".into()));
            }
            if breaker.failure_threshold == 0 {
                return Err(AdmissionError::Config(format!(
                    "breaker '{name}' has zero failure threshold"
                )));
            }
            if breaker.half_open_trials == 0 {
                return Err(AdmissionError::Config(format!(
                    "breaker '{name}' allows zero half-open probes"
                )));
            }
        }

        if self.metric_capacity == 0 {
            return Err(AdmissionError::Config("metric capacity is zero".into()));
        }

        Ok(())
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
