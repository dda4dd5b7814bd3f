//! Metrics collection for the permission engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for resolution, cache and gate activity.
///
/// All counters are relaxed atomics; a snapshot is consistent per counter,
/// not across counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    resolutions: AtomicU64,
    superadmin_bypasses: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    swept_entries: AtomicU64,
    access_granted: AtomicU64,
    access_denied: AtomicU64,
    access_unauthenticated: AtomicU64,
}

impl EngineMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a full (uncached) resolution.
    pub fn record_resolution(&self) {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resolution short-circuited by the superadmin type.
    pub fn record_superadmin_bypass(&self) {
        self.superadmin_bypasses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record entries reclaimed by a sweep.
    pub fn record_swept(&self, count: usize) {
        self.swept_entries.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_granted(&self) {
        self.access_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.access_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unauthenticated(&self) {
        self.access_unauthenticated.fetch_add(1, Ordering::Relaxed);
    }

    /// Get cache hit ratio.
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Take a point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            superadmin_bypasses: self.superadmin_bypasses.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            swept_entries: self.swept_entries.load(Ordering::Relaxed),
            access_granted: self.access_granted.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
            access_unauthenticated: self.access_unauthenticated.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.resolutions,
            &self.superadmin_bypasses,
            &self.cache_hits,
            &self.cache_misses,
            &self.swept_entries,
            &self.access_granted,
            &self.access_denied,
            &self.access_unauthenticated,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Plain copy of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub resolutions: u64,
    pub superadmin_bypasses: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub swept_entries: u64,
    pub access_granted: u64,
    pub access_denied: u64,
    pub access_unauthenticated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_ratio() {
        let metrics = EngineMetrics::new();
        assert_eq!(metrics.cache_hit_ratio(), 0.0);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_resolution();
        metrics.record_swept(4);
        metrics.record_denied();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 3);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.resolutions, 1);
        assert_eq!(snapshot.swept_entries, 4);
        assert_eq!(snapshot.access_denied, 1);
        assert_eq!(metrics.cache_hit_ratio(), 0.75);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
