//! Metrics collection for the ranking cache

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    /// Invalidation signals accepted
    pub invalidations: u64,

    /// Invalidations absorbed by an already scheduled recompute
    pub coalesced_invalidations: u64,

    /// Recompute passes run by background workers
    pub recompute_passes: u64,

    /// Builds run inline by a reader that found no entry at all
    pub synchronous_builds: u64,

    /// Reads answered with a stale entry after the recompute timeout
    pub stale_reads: u64,

    pub build_failures: u64,

    pub uptime_seconds: u64,
}

/// Lock-free counters updated by the cache manager
pub struct CacheMetrics {
    invalidations: AtomicU64,
    coalesced_invalidations: AtomicU64,
    recompute_passes: AtomicU64,
    synchronous_builds: AtomicU64,
    stale_reads: AtomicU64,
    build_failures: AtomicU64,
    start_time: Instant,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self {
            invalidations: AtomicU64::new(0),
            coalesced_invalidations: AtomicU64::new(0),
            recompute_passes: AtomicU64::new(0),
            synchronous_builds: AtomicU64::new(0),
            stale_reads: AtomicU64::new(0),
            build_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_invalidation(&self, coalesced: bool) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if coalesced {
            self.coalesced_invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_recompute_pass(&self) {
        self.recompute_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synchronous_build(&self) {
        self.synchronous_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_read(&self) {
        self.stale_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_build_failure(&self) {
        self.build_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            invalidations: self.invalidations.load(Ordering::Relaxed),
            coalesced_invalidations: self.coalesced_invalidations.load(Ordering::Relaxed),
            recompute_passes: self.recompute_passes.load(Ordering::Relaxed),
            synchronous_builds: self.synchronous_builds.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}
