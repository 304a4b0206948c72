//! Slab pool
//!
//! Owns an ordered set of slabs and carves buffers out of them. Allocation
//! is first-fit across slabs in creation order. When nothing fits, the pool
//! grows by a batch of slabs; `shrink()` gives surplus fully free slabs back.
//!
//! Locking is split in two: the slab list lock is held only to snapshot,
//! append, or remove entries, and a separate growth lock ensures racing
//! callers that all found the pool exhausted produce one batch between them.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::buffer::Buffer;
use super::policy::ReleasePolicy;
use super::slab::{Region, Slab, SlabId};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::metrics::METRICS;

/// Smallest slab the pool will create (the default glibc mmap threshold),
/// so every slab is its own mapping instead of arena memory.
pub const MIN_SLAB_CAPACITY: usize = 128 * 1024;

/// Shared pool state
struct PoolInner {
    slab_capacity: usize,
    initial_slab_count: usize,
    growth_batch_size: usize,
    release_policy: ReleasePolicy,
    /// Slabs in creation order. Index 0 is never removed: shrink needs two
    /// fully free slabs and always takes the higher-indexed one.
    slabs: Mutex<Vec<Arc<Slab>>>,
    /// Serializes slab creation
    grow_lock: Mutex<()>,
    /// The slab at index 0, probed without the list lock
    primary: Arc<Slab>,
    /// Advisory "exactly one slab" hint; may be stale in either direction
    single_slab: AtomicBool,
    next_slab_id: AtomicU64,
}

impl PoolInner {
    fn create_slab(&self) -> Arc<Slab> {
        let id = SlabId::from_raw(self.next_slab_id.fetch_add(1, Ordering::Relaxed));
        METRICS.slab_created();
        debug!(slab = %id, capacity = self.slab_capacity, "Slab created");
        Arc::new(Slab::new(id, self.slab_capacity))
    }

    fn reserve(&self, size: usize) -> Result<Region> {
        if self.single_slab.load(Ordering::Relaxed) {
            if let Some(region) = self.primary.try_reserve(size) {
                METRICS.fast_path_hit();
                return Ok(region);
            }
            // About to grow, or already grown: stop probing the primary alone
            self.single_slab.store(false, Ordering::Relaxed);
        }

        if let Some(region) = self.search(size) {
            return Ok(region);
        }

        self.grow(size)
    }

    /// First fit over a snapshot of the slab list
    fn search(&self, size: usize) -> Option<Region> {
        let snapshot = self.slabs.lock().clone();
        first_fit(&snapshot, size)
    }

    fn grow(&self, size: usize) -> Result<Region> {
        let _grow = self.grow_lock.lock();

        // Someone may have grown the pool while we waited
        if let Some(region) = self.search(size) {
            return Ok(region);
        }

        let slab = self.create_slab();
        let region = slab
            .try_reserve(size)
            .ok_or(PoolError::RequestTooLarge {
                requested: size,
                capacity: self.slab_capacity,
            })?;

        let mut fresh = Vec::with_capacity(self.growth_batch_size);
        fresh.push(slab);
        for _ in 1..self.growth_batch_size {
            fresh.push(self.create_slab());
        }

        let slab_count = {
            let mut slabs = self.slabs.lock();
            slabs.extend(fresh);
            self.single_slab.store(false, Ordering::Relaxed);
            slabs.len()
        };

        METRICS.pool_grew();
        info!(
            requested = size,
            added = self.growth_batch_size,
            slab_count,
            "Pool grew"
        );

        Ok(region)
    }
}

/// Reserve from the first slab that reports room and wins the race for it
fn first_fit(slabs: &[Arc<Slab>], size: usize) -> Option<Region> {
    slabs
        .iter()
        .filter(|slab| slab.largest_free_run() >= size)
        .find_map(|slab| slab.try_reserve(size))
}

/// Pool of slabs that hands out [`Buffer`]s
#[derive(Clone)]
pub struct SlabPool {
    inner: Arc<PoolInner>,
}

impl SlabPool {
    /// Create a pool, eagerly creating `initial_slab_count` slabs
    pub fn new(config: &PoolConfig) -> Result<Self> {
        if config.slab_capacity < 1 {
            return Err(PoolError::invalid_argument("slab_capacity must be > 0"));
        }
        if config.initial_slab_count < 1 {
            return Err(PoolError::invalid_argument("initial_slab_count must be > 0"));
        }
        if config.growth_batch_size < 1 {
            return Err(PoolError::invalid_argument("growth_batch_size must be > 0"));
        }

        let slab_capacity = config.slab_capacity.max(MIN_SLAB_CAPACITY);
        let next_slab_id = AtomicU64::new(0);
        let slabs: Vec<Arc<Slab>> = (0..config.initial_slab_count)
            .map(|_| {
                let id = SlabId::from_raw(next_slab_id.fetch_add(1, Ordering::Relaxed));
                METRICS.slab_created();
                Arc::new(Slab::new(id, slab_capacity))
            })
            .collect();
        let primary = Arc::clone(&slabs[0]);

        info!(
            slab_capacity,
            initial_slab_count = config.initial_slab_count,
            growth_batch_size = config.growth_batch_size,
            release_policy = ?config.release_policy,
            "Slab pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                slab_capacity,
                initial_slab_count: config.initial_slab_count,
                growth_batch_size: config.growth_batch_size,
                release_policy: config.release_policy,
                slabs: Mutex::new(slabs),
                grow_lock: Mutex::new(()),
                primary,
                single_slab: AtomicBool::new(config.initial_slab_count == 1),
                next_slab_id,
            }),
        })
    }

    /// Create a pool with the default release policy
    pub fn with_capacity(
        slab_capacity: usize,
        initial_slab_count: usize,
        growth_batch_size: usize,
    ) -> Result<Self> {
        Self::new(&PoolConfig {
            slab_capacity,
            initial_slab_count,
            growth_batch_size,
            release_policy: ReleasePolicy::default(),
        })
    }

    /// Allocate a buffer of `size` bytes.
    ///
    /// A zero size yields an unbound buffer without reserving anything.
    pub fn allocate(&self, size: usize) -> Result<Buffer> {
        if size == 0 {
            METRICS.zero_length_allocated();
            return Ok(Buffer::unbound(Arc::clone(&self.inner.primary)));
        }
        if size > self.inner.slab_capacity {
            METRICS.allocation_failed();
            return Err(PoolError::RequestTooLarge {
                requested: size,
                capacity: self.inner.slab_capacity,
            });
        }

        let region = self.inner.reserve(size)?;
        let buffer = Buffer::bound([region], self.inner.release_policy)?;
        METRICS.buffer_allocated(size);
        Ok(buffer)
    }

    /// Allocate a buffer of `size` bytes and copy `fill` into its front.
    ///
    /// An empty `fill` is ignored. A `fill` longer than `size` is rejected
    /// before anything is reserved.
    pub fn allocate_filled(&self, size: usize, fill: &[u8]) -> Result<Buffer> {
        if fill.is_empty() {
            return self.allocate(size);
        }
        if fill.len() > size {
            METRICS.allocation_failed();
            return Err(PoolError::invalid_argument(format!(
                "fill of {} bytes exceeds requested size {size}",
                fill.len()
            )));
        }

        let mut buffer = self.allocate(size)?;
        buffer.copy_in(fill)?;
        Ok(buffer)
    }

    /// Remove one surplus fully free slab.
    ///
    /// Does nothing unless more than `initial_slab_count` slabs are fully
    /// free. Removes at most one slab per call, the highest-indexed fully
    /// free one. Returns whether a slab was removed.
    pub fn shrink(&self) -> bool {
        let inner = &self.inner;
        let mut slabs = inner.slabs.lock();

        let fully_free = slabs.iter().filter(|slab| slab.is_fully_free()).count();
        if fully_free <= inner.initial_slab_count {
            return false;
        }

        // Retirement re-checks under the slab's own lock, so a reservation
        // racing from an older snapshot either wins first or is refused.
        let Some(idx) = (1..slabs.len())
            .rev()
            .find(|&idx| slabs[idx].is_fully_free() && slabs[idx].try_retire())
        else {
            return false;
        };

        let removed = slabs.remove(idx);
        let slab_count = slabs.len();
        if slab_count == 1 {
            inner.single_slab.store(true, Ordering::Relaxed);
        }
        drop(slabs);

        METRICS.slab_removed();
        info!(slab = %removed.id(), slab_count, "Pool shrank");
        true
    }

    /// Current number of slabs
    pub fn slab_count(&self) -> usize {
        self.inner.slabs.lock().len()
    }

    /// Capacity of each slab after clamping to [`MIN_SLAB_CAPACITY`]
    pub fn slab_capacity(&self) -> usize {
        self.inner.slab_capacity
    }

    pub fn initial_slab_count(&self) -> usize {
        self.inner.initial_slab_count
    }

    pub fn growth_batch_size(&self) -> usize {
        self.inner.growth_batch_size
    }

    pub fn release_policy(&self) -> ReleasePolicy {
        self.inner.release_policy
    }

    /// Advisory single-slab hint used to pick the search path
    pub fn is_single_slab(&self) -> bool {
        self.inner.single_slab.load(Ordering::Relaxed)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let snapshot = self.inner.slabs.lock().clone();
        let slab_capacity = self.inner.slab_capacity;
        let bytes_free: usize = snapshot.iter().map(|slab| slab.free_bytes()).sum();
        let bytes_capacity = slab_capacity * snapshot.len();

        PoolStats {
            slab_count: snapshot.len(),
            fully_free_slabs: snapshot.iter().filter(|slab| slab.is_fully_free()).count(),
            slab_capacity,
            bytes_capacity,
            bytes_reserved: bytes_capacity.saturating_sub(bytes_free),
            largest_free_run: snapshot
                .iter()
                .map(|slab| slab.largest_free_run())
                .max()
                .unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for SlabPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabPool")
            .field("slab_capacity", &self.inner.slab_capacity)
            .field("initial_slab_count", &self.inner.initial_slab_count)
            .field("growth_batch_size", &self.inner.growth_batch_size)
            .field("slab_count", &self.slab_count())
            .finish()
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub slab_count: usize,
    pub fully_free_slabs: usize,
    pub slab_capacity: usize,
    pub bytes_capacity: usize,
    pub bytes_reserved: usize,
    pub largest_free_run: usize,
}
