//! Request/error statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::Serialize;

/// Result of one handled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "ok",
            Outcome::Error => "error",
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub started: u64,
    pub requests: u64,
    pub errors: u64,
}

/// Sink for per-request outcomes.
pub trait Stats: Send + Sync {
    /// Records exactly one request outcome.
    fn record(&self, outcome: Outcome);

    fn read(&self) -> StatsSnapshot;
}

/// Atomic counters, mirrored into the `metrics` facade.
pub struct MemoryStats {
    started: u64,
    requests: AtomicU64,
    errors: AtomicU64,
}

impl MemoryStats {
    #[must_use]
    pub fn new() -> Self {
        let started = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            started,
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats for MemoryStats {
    fn record(&self, outcome: Outcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if outcome == Outcome::Error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!("plexus_handler_requests_total", "outcome" => outcome.as_str())
            .increment(1);
    }

    fn read(&self) -> StatsSnapshot {
        StatsSnapshot {
            started: self.started,
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_counts_requests_and_errors() {
        let stats = MemoryStats::new();
        stats.record(Outcome::Success);
        stats.record(Outcome::Error);
        stats.record(Outcome::Success);

        let snap = stats.read();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.errors, 1);
    }
}
