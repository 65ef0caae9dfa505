// typeroute-messaging-core/src/metrics.rs
//! Dispatch counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Messages whose every handler succeeded
    dispatched: AtomicU64,
    /// Messages of a known type with no handler
    unhandled: AtomicU64,
    /// Messages rejected for a missing or unknown type, or an undecodable body
    rejected: AtomicU64,
    /// Handler invocations that failed or timed out
    handler_failures: AtomicU64,
    /// Non-null results forwarded to the result handler
    results: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn inc_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unhandled(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }

    pub fn inc_unhandled(&self) {
        self.unhandled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    pub fn inc_handler_failures(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn results(&self) -> u64 {
        self.results.load(Ordering::Relaxed)
    }

    pub fn inc_results(&self) {
        self.results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched(),
            unhandled: self.unhandled(),
            rejected: self.rejected(),
            handler_failures: self.handler_failures(),
            results: self.results(),
        }
    }
}

/// Point-in-time copy of [`DispatchMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub unhandled: u64,
    pub rejected: u64,
    pub handler_failures: u64,
    pub results: u64,
}
