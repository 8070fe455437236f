// for error definitions
use std::time::Duration;
use thiserror::Error;

use crate::gauge::LoadLevel;

#[derive(Error, Debug)]
pub enum AdmissionError {
    /// A limiter rule tripped; the caller may retry after the window resets
    #[error("rate limit exceeded by rule '{rule}', retry after {}s", retry_after.as_secs())]
    QuotaExceeded { rule: String, retry_after: Duration },

    /// The circuit breaker guarding a downstream dependency is open
    #[error("dependency '{dependency}' unavailable: circuit open")]
    DependencyUnavailable { dependency: String },

    /// The degradation policy shed this request because of system load
    #[error("request shed: load level {level:?} exceeds threshold for class '{class}'")]
    LoadShed { level: LoadLevel, class: String },

    /// Invalid configuration detected at startup; fatal, never produced on the request path
    #[error("configuration error: {0}")]
    Config(String),
}

impl AdmissionError {
    /// Stable wire code included in rejection payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::QuotaExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AdmissionError::DependencyUnavailable { .. } => "CIRCUIT_OPEN",
            AdmissionError::LoadShed { .. } => "DEGRADED",
            AdmissionError::Config(_) => "CONFIGURATION_ERROR",
        }
    }

    /// HTTP status for the rejection: 429 for quota, 503 for breaker/degradation.
    pub fn http_status(&self) -> u16 {
        match self {
            AdmissionError::QuotaExceeded { .. } => 429,
            _ => 503,
        }
    }

    /// Suggested retry delay, where one makes sense for the caller.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdmissionError::QuotaExceeded { retry_after, .. } => Some(*retry_after),
            AdmissionError::DependencyUnavailable { .. } => Some(Duration::from_secs(30)),
            AdmissionError::LoadShed { .. } => Some(Duration::from_secs(10)),
            AdmissionError::Config(_) => None,
        }
    }

    /// Name of the rule that tripped, for limiter rejections.
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            AdmissionError::QuotaExceeded { rule, .. } => Some(rule),
            _ => None,
        }
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, AdmissionError>;
