// src/limiter/store.rs

//! Sharded per-(rule, client-key) window counters.
//!
//! DashMap gives one lock per shard, so unrelated clients never serialize on
//! a global lock, and the entry guard makes each check-and-increment atomic.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    rule: String,
    client: String,
}

/// Counter for one (rule, client-key) pair within the current window.
#[derive(Debug)]
struct WindowSlot {
    count: u64,
    window_start: Instant,
    /// Window duration, kept here so the sweeper can tell expired slots apart
    window: Duration,
}

/// Outcome of one charge attempt.
#[derive(Debug)]
pub enum Charge {
    Charged,
    Denied { retry_after: Duration },
}

#[derive(Debug, Default)]
pub struct CounterStore {
    slots: DashMap<SlotKey, WindowSlot>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check the quota for this slot and charge one unit if under.
    /// An expired window resets lazily on first access.
    pub fn try_charge(
        &self,
        rule: &str,
        client: &str,
        quota: u64,
        window: Duration,
    ) -> Charge {
        let now = Instant::now();
        let key = SlotKey {
            rule: rule.to_string(),
            client: client.to_string(),
        };

        let mut slot = self.slots.entry(key).or_insert_with(|| WindowSlot {
            count: 0,
            window_start: now,
            window,
        });

        let elapsed = now.duration_since(slot.window_start);
        if elapsed >= slot.window {
            slot.count = 0;
            slot.window_start = now;
        }

        if slot.count < quota {
            slot.count += 1;
            Charge::Charged
        } else {
            Charge::Denied {
                retry_after: slot.window.saturating_sub(now.duration_since(slot.window_start)),
            }
        }
    }

    /// Give one unit back, for rules that skip counting a known outcome.
    /// A refund landing after the window rolled over is harmless slack.
    pub fn refund(&self, rule: &str, client: &str) {
        let key = SlotKey {
            rule: rule.to_string(),
            client: client.to_string(),
        };
        if let Some(mut slot) = self.slots.get_mut(&key) {
            slot.count = slot.count.saturating_sub(1);
        }
    }

    /// Current count for a slot, zero if absent or expired.
    pub fn count(&self, rule: &str, client: &str) -> u64 {
        let key = SlotKey {
            rule: rule.to_string(),
            client: client.to_string(),
        };
        match self.slots.get(&key) {
            Some(slot) if Instant::now().duration_since(slot.window_start) < slot.window => {
                slot.count
            }
            _ => 0,
        }
    }

    /// Drop slots whose window closed with no further activity.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.slots
            .retain(|_, slot| now.duration_since(slot.window_start) < slot.window);
    }

    /// Number of live slots (includes not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
