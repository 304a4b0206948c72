//! Atomic counters for hot-path metrics
//!
//! Lock-free counters that can be safely updated from any thread.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Allocation metrics
    pub allocations: AtomicU64,
    pub zero_length_allocations: AtomicU64,
    pub fast_path_hits: AtomicU64,
    pub bytes_allocated: AtomicU64,
    pub allocation_failures: AtomicU64,

    // Release metrics
    pub releases: AtomicU64,
    pub release_failures: AtomicU64,

    // Slab lifecycle metrics
    pub growth_events: AtomicU64,
    pub slabs_created: AtomicU64,
    pub slabs_removed: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            zero_length_allocations: AtomicU64::new(0),
            fast_path_hits: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
            growth_events: AtomicU64::new(0),
            slabs_created: AtomicU64::new(0),
            slabs_removed: AtomicU64::new(0),
        }
    }

    // Allocation tracking
    #[inline]
    pub fn buffer_allocated(&self, bytes: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn zero_length_allocated(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.zero_length_allocations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn fast_path_hit(&self) {
        self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn allocation_failed(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Release tracking
    #[inline]
    pub fn buffer_released(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn release_failed(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Slab lifecycle
    #[inline]
    pub fn pool_grew(&self) {
        self.growth_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn slab_created(&self) {
        self.slabs_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn slab_removed(&self) {
        self.slabs_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            zero_length_allocations: self.zero_length_allocations.load(Ordering::Relaxed),
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            growth_events: self.growth_events.load(Ordering::Relaxed),
            slabs_created: self.slabs_created.load(Ordering::Relaxed),
            slabs_removed: self.slabs_removed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub zero_length_allocations: u64,
    pub fast_path_hits: u64,
    pub bytes_allocated: u64,
    pub allocation_failures: u64,
    pub releases: u64,
    pub release_failures: u64,
    pub growth_events: u64,
    pub slabs_created: u64,
    pub slabs_removed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();

        metrics.buffer_allocated(100);
        metrics.buffer_allocated(28);
        metrics.zero_length_allocated();
        metrics.pool_grew();
        for _ in 0..4 {
            metrics.slab_created();
        }
        metrics.slab_removed();

        let snap = metrics.snapshot();
        assert_eq!(snap.allocations, 3);
        assert_eq!(snap.zero_length_allocations, 1);
        assert_eq!(snap.bytes_allocated, 128);
        assert_eq!(snap.growth_events, 1);
        assert_eq!(snap.slabs_created, 4);
        assert_eq!(snap.slabs_removed, 1);
    }
}
