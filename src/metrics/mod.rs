// src/metrics/mod.rs

//! Per-request metric recording into a bounded ring buffer.
//!
//! The buffer is small and fixed-capacity; aggregate views are computed by
//! scanning it on read. Snapshots taken mid-update are acceptable, this is
//! monitoring data, not a correctness gate.

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Request outcome, derived from the response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    ClientError,
    ServerError,
}

impl Outcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            500..=599 => Outcome::ServerError,
            400..=499 => Outcome::ClientError,
            _ => Outcome::Success,
        }
    }
}

/// One completed request.
#[derive(Debug, Clone)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub outcome: Outcome,
    pub latency: Duration,
}

/// Aggregate view over the buffer window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total: usize,
    pub success: usize,
    pub client_errors: usize,
    pub server_errors: usize,
    pub error_rate: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
}

/// One per-minute history bucket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBucket {
    pub minute: DateTime<Utc>,
    pub total: usize,
    pub errors: usize,
    pub avg_latency_ms: u64,
}

/// Bounded recorder of request samples. Oldest samples are overwritten once
/// capacity is reached; the buffer never grows past `capacity`.
#[derive(Debug)]
pub struct MetricRecorder {
    buffer: Mutex<VecDeque<Sample>>,
    capacity: usize,
}

impl MetricRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full. O(1).
    pub fn record(&self, sample: Sample) {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(sample);
    }

    pub fn record_status(&self, status: u16, latency: Duration) {
        self.record(Sample {
            at: Utc::now(),
            outcome: Outcome::from_status(status),
            latency,
        });
    }

    /// Fraction of buffered samples that were server errors.
    pub fn server_error_rate(&self) -> f64 {
        let buffer = self.buffer.lock().unwrap();
        if buffer.is_empty() {
            return 0.0;
        }
        let errors = buffer
            .iter()
            .filter(|s| s.outcome == Outcome::ServerError)
            .count();
        errors as f64 / buffer.len() as f64
    }

    /// Aggregate counters and latency percentiles over the buffer window.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let buffer = self.buffer.lock().unwrap();

        let mut success = 0usize;
        let mut client_errors = 0usize;
        let mut server_errors = 0usize;
        let mut latencies: Vec<u64> = Vec::with_capacity(buffer.len());

        for sample in buffer.iter() {
            match sample.outcome {
                Outcome::Success => success += 1,
                Outcome::ClientError => client_errors += 1,
                Outcome::ServerError => server_errors += 1,
            }
            latencies.push(sample.latency.as_millis() as u64);
        }

        let total = buffer.len();
        drop(buffer);

        latencies.sort_unstable();
        let error_rate = if total == 0 {
            0.0
        } else {
            (client_errors + server_errors) as f64 / total as f64
        };

        MetricsSnapshot {
            total,
            success,
            client_errors,
            server_errors,
            error_rate,
            p50_latency_ms: percentile(&latencies, 50),
            p95_latency_ms: percentile(&latencies, 95),
        }
    }

    /// Per-minute buckets over the buffer window, oldest first.
    pub fn history(&self) -> Vec<HistoryBucket> {
        let buffer = self.buffer.lock().unwrap();

        let mut grouped: Vec<(HistoryBucket, u128)> = Vec::new();

        for sample in buffer.iter() {
            let minute = sample
                .at
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(sample.at);
            let is_error = sample.outcome != Outcome::Success;
            let millis = sample.latency.as_millis();

            // Samples arrive in time order, so the current bucket is last
            match grouped.last_mut() {
                Some((bucket, latency_sum)) if bucket.minute == minute => {
                    bucket.total += 1;
                    bucket.errors += usize::from(is_error);
                    *latency_sum += millis;
                }
                _ => grouped.push((
                    HistoryBucket {
                        minute,
                        total: 1,
                        errors: usize::from(is_error),
                        avg_latency_ms: 0,
                    },
                    millis,
                )),
            }
        }

        grouped
            .into_iter()
            .map(|(mut bucket, latency_sum)| {
                bucket.avg_latency_ms = (latency_sum / bucket.total as u128) as u64;
                bucket
            })
            .collect()
    }
}

/// Nearest-rank percentile of a sorted slice. Zero for an empty slice.
fn percentile(sorted: &[u64], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}
