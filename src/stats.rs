//! Fetch and cache-write counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::format::{format_bytes, format_duration};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// The offline document, substituted for a failed navigation.
    OfflineFallback,
}

/// Snapshot of a worker's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Requests left to the default network path (non-GET, cross-origin).
    pub passthrough: u64,
    pub network_responses: u64,
    pub cache_hits: u64,
    pub offline_fallbacks: u64,
    /// Requests that could not be served at all.
    pub failures: u64,
    pub cache_writes: u64,
    pub cache_write_errors: u64,
    pub bytes_served: u64,
    #[serde(skip)]
    pub uptime: Duration,
}

impl WorkerStats {
    /// Total intercepted requests that produced a response.
    #[must_use]
    pub const fn served(&self) -> u64 {
        self.network_responses + self.cache_hits + self.offline_fallbacks
    }

    /// Fraction of served responses that came from a partition.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let served = self.served();
        if served == 0 {
            0.0
        } else {
            (self.cache_hits + self.offline_fallbacks) as f64 / served as f64
        }
    }

    /// One-line human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} served ({} network, {} cache, {} offline), {} failed, {} passthrough, {} written, {} in {}",
            self.served(),
            self.network_responses,
            self.cache_hits,
            self.offline_fallbacks,
            self.failures,
            self.passthrough,
            self.cache_writes,
            format_bytes(self.bytes_served),
            format_duration(self.uptime),
        )
    }
}

/// Lock-free counters updated from concurrent fetch handlers.
#[derive(Debug)]
pub struct StatsTracker {
    start_time: Instant,
    passthrough: AtomicU64,
    network_responses: AtomicU64,
    cache_hits: AtomicU64,
    offline_fallbacks: AtomicU64,
    failures: AtomicU64,
    cache_writes: AtomicU64,
    cache_write_errors: AtomicU64,
    bytes_served: AtomicU64,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            passthrough: AtomicU64::new(0),
            network_responses: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            offline_fallbacks: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            cache_writes: AtomicU64::new(0),
            cache_write_errors: AtomicU64::new(0),
            bytes_served: AtomicU64::new(0),
        }
    }

    pub fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a served response of `bytes` length.
    pub fn record_served(&self, source: ResponseSource, bytes: usize) {
        let counter = match source {
            ResponseSource::Network => &self.network_responses,
            ResponseSource::Cache => &self.cache_hits,
            ResponseSource::OfflineFallback => &self.offline_fallbacks,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_served
            .fetch_add(bytes.try_into().unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the result of a detached cache write.
    pub fn record_write(&self, ok: bool) {
        if ok {
            self.cache_writes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            passthrough: self.passthrough.load(Ordering::Relaxed),
            network_responses: self.network_responses.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            offline_fallbacks: self.offline_fallbacks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_write_errors: self.cache_write_errors.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats() {
        let stats = StatsTracker::new().snapshot();
        assert_eq!(stats.served(), 0);
        assert!(stats.hit_ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn record_served_by_source() {
        let tracker = StatsTracker::new();
        tracker.record_served(ResponseSource::Network, 100);
        tracker.record_served(ResponseSource::Cache, 50);
        tracker.record_served(ResponseSource::Cache, 50);
        tracker.record_served(ResponseSource::OfflineFallback, 10);
        tracker.record_passthrough();
        tracker.record_failure();

        let stats = tracker.snapshot();
        assert_eq!(stats.network_responses, 1);
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.offline_fallbacks, 1);
        assert_eq!(stats.passthrough, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.bytes_served, 210);
        assert!((stats.hit_ratio() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn record_write_outcomes() {
        let tracker = StatsTracker::new();
        tracker.record_write(true);
        tracker.record_write(true);
        tracker.record_write(false);
        let stats = tracker.snapshot();
        assert_eq!(stats.cache_writes, 2);
        assert_eq!(stats.cache_write_errors, 1);
    }

    #[test]
    fn summary_mentions_counts() {
        let tracker = StatsTracker::new();
        tracker.record_served(ResponseSource::Network, 2048);
        let summary = tracker.snapshot().summary();
        assert!(summary.starts_with("1 served (1 network"));
        assert!(summary.contains("2.00 KB"));
    }
}
