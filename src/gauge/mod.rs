// src/gauge/mod.rs

//! Load gauge: classifies current process load into a small ordered ladder.
//!
//! Two levels above normal is deliberate. A finer-grained adaptive signal
//! invites oscillation; a coarse monotonic ladder is easy to reason about
//! and easy to test.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::LoadConfig;
use crate::metrics::MetricRecorder;

/// Current load level, ordered from calm to saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Normal,
    Medium,
    High,
}

impl LoadLevel {
    /// One step up the ladder, saturating at High.
    pub fn bumped(self) -> LoadLevel {
        match self {
            LoadLevel::Normal => LoadLevel::Medium,
            LoadLevel::Medium | LoadLevel::High => LoadLevel::High,
        }
    }
}

/// Source of the current load level. Reading must be cheap and side-effect
/// free: the admission path calls this on every request.
pub trait LoadGauge: Send + Sync + Debug {
    fn current_level(&self) -> LoadLevel;
}

/// Minimum age of the cached sample before the gauge re-reads process memory.
const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Memory-pressure gauge: resident set size as a fraction of the configured
/// ceiling, compared against two ascending thresholds. Optionally raises the
/// level one step when the recent server-error rate is elevated.
#[derive(Debug)]
pub struct MemoryLoadGauge {
    config: LoadConfig,
    metrics: Option<Arc<MetricRecorder>>,
    /// Nanoseconds since `origin` of the last refresh; 0 = never sampled
    last_refresh_nanos: AtomicU64,
    /// Cached usage fraction, stored as f64 bits
    fraction_bits: AtomicU64,
    origin: Instant,
}

impl MemoryLoadGauge {
    pub fn new(config: LoadConfig, metrics: Option<Arc<MetricRecorder>>) -> Self {
        Self {
            config,
            metrics,
            last_refresh_nanos: AtomicU64::new(0),
            fraction_bits: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }

    /// Current memory usage fraction (cached, refreshed at most every 250 ms).
    pub fn memory_fraction(&self) -> f64 {
        let now_nanos = self.origin.elapsed().as_nanos() as u64;
        let last = self.last_refresh_nanos.load(Ordering::Acquire);

        if last == 0 || now_nanos.saturating_sub(last) > REFRESH_INTERVAL.as_nanos() as u64 {
            // Racing refreshers both read and both store; last write wins,
            // which is fine for monitoring data.
            let fraction = resident_bytes() as f64 / self.config.memory_ceiling_bytes as f64;
            self.fraction_bits
                .store(fraction.to_bits(), Ordering::Release);
            self.last_refresh_nanos.store(now_nanos, Ordering::Release);
            fraction
        } else {
            f64::from_bits(self.fraction_bits.load(Ordering::Acquire))
        }
    }

    fn level_from_fraction(&self, fraction: f64) -> LoadLevel {
        if fraction >= self.config.high_fraction {
            LoadLevel::High
        } else if fraction >= self.config.medium_fraction {
            LoadLevel::Medium
        } else {
            LoadLevel::Normal
        }
    }
}

impl LoadGauge for MemoryLoadGauge {
    fn current_level(&self) -> LoadLevel {
        let mut level = self.level_from_fraction(self.memory_fraction());

        if let (Some(threshold), Some(metrics)) = (self.config.error_rate_bump, &self.metrics) {
            if metrics.server_error_rate() > threshold {
                level = level.bumped();
            }
        }

        level
    }
}

/// Resident set size of the current process, in bytes. Linux only; other
/// hosts report zero, which keeps the gauge at Normal.
#[cfg(target_os = "linux")]
fn resident_bytes() -> u64 {
    // /proc/self/statm: size resident shared text lib data dt (pages)
    let statm = match std::fs::read_to_string("/proc/self/statm") {
        Ok(s) => s,
        Err(_) => return 0,
    };
    let resident_pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    resident_pages * 4096
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> u64 {
    0
}

/// Fixed-level gauge for tests and for wiring the layer in environments
/// where memory sampling is unavailable.
#[derive(Debug)]
pub struct FixedLoadGauge {
    level: std::sync::Mutex<LoadLevel>,
}

impl FixedLoadGauge {
    pub fn new(level: LoadLevel) -> Self {
        Self {
            level: std::sync::Mutex::new(level),
        }
    }

    pub fn set(&self, level: LoadLevel) {
        *self.level.lock().unwrap() = level;
    }
}

impl LoadGauge for FixedLoadGauge {
    fn current_level(&self) -> LoadLevel {
        *self.level.lock().unwrap()
    }
}
