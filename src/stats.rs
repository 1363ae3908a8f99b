//! Global CPU tick accounting.
//!
//! One active tick per executed instruction, one idle tick per idle sleep
//! quantum of a core worker. The counters are shared by handle, not by
//! global state, so tests can run isolated instances.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TickCounters {
    active: AtomicU64,
    idle: AtomicU64,
}

impl TickCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_active(&self, n: u64) {
        self.active.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_idle(&self, n: u64) {
        self.idle.fetch_add(n, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> u64 {
        self.idle.load(Ordering::Relaxed)
    }

    /// Total ticks seen so far, active and idle combined
    pub fn total(&self) -> u64 {
        self.active() + self.idle()
    }

    /// Share of total ticks spent executing instructions, in percent
    pub fn cpu_utilization(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            100.0 * self.active() as f64 / total as f64
        }
    }
}
