// src/test_utils.rs

use std::sync::Arc;

use crate::admission::{AdmissionController, RequestInfo};
use crate::config::AdmissionConfig;
use crate::gauge::{FixedLoadGauge, LoadLevel};

/// Controller with the stock configuration and a settable gauge, so tests
/// drive the load level directly.
pub fn test_controller(level: LoadLevel) -> (Arc<AdmissionController>, Arc<FixedLoadGauge>) {
    test_controller_with(AdmissionConfig::default(), level)
}

pub fn test_controller_with(
    config: AdmissionConfig,
    level: LoadLevel,
) -> (Arc<AdmissionController>, Arc<FixedLoadGauge>) {
    let gauge = Arc::new(FixedLoadGauge::new(level));
    let controller = AdmissionController::with_gauge(config, gauge.clone())
        .expect("test config must validate");
    (Arc::new(controller), gauge)
}

/// A plain anonymous request from a fixed address.
pub fn request(method: &str, path: &str) -> RequestInfo {
    RequestInfo {
        remote: "10.1.1.1".parse().unwrap(),
        forwarded_for: None,
        identity: None,
        method: method.to_string(),
        path: path.to_string(),
    }
}

pub fn request_from(ip: &str, method: &str, path: &str) -> RequestInfo {
    RequestInfo {
        remote: ip.parse().unwrap(),
        forwarded_for: None,
        identity: None,
        method: method.to_string(),
        path: path.to_string(),
    }
}
