// library entry
pub mod admission;
pub mod breaker;
pub mod config;
pub mod error;
pub mod gauge;
pub mod http;
pub mod limiter;
pub mod logging;
pub mod metrics;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use admission::{AdmissionController, RequestInfo};
pub use config::AdmissionConfig;
pub use error::{AdmissionError, Result};
pub use gauge::{LoadGauge, LoadLevel};
pub use logging::init as init_logging;
