//! Soak workload
//!
//! Worker threads hammer one pool with random-sized allocations, write a
//! per-buffer byte pattern, read it back through the segment descriptors and
//! dispose. A share of buffers is parked in a shared queue and disposed by
//! whichever worker picks it up next, the way I/O completions land on a
//! different thread than the one that started the operation.

use crossbeam::queue::ArrayQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SoakConfig;
use crate::error::Result;
use crate::metrics::{MetricsSnapshot, METRICS};
use crate::pool::{Buffer, PoolStats, SlabPool};

/// Chance that a worker parks a buffer instead of disposing it itself
const HANDOFF_PROBABILITY: f64 = 0.25;

/// Shared soak state
pub struct Soak {
    pool: SlabPool,
    max_buffer_size: usize,
    handoff: ArrayQueue<Buffer>,
    stop: AtomicBool,
    iterations: AtomicU64,
    handoffs: AtomicU64,
    mismatches: AtomicU64,
    errors: AtomicU64,
}

impl Soak {
    pub fn new(pool: SlabPool, config: &SoakConfig) -> Self {
        let max_buffer_size = config.max_buffer_size.min(pool.slab_capacity());
        Self {
            pool,
            max_buffer_size,
            handoff: ArrayQueue::new(config.handoff_capacity),
            stop: AtomicBool::new(false),
            iterations: AtomicU64::new(0),
            handoffs: AtomicU64::new(0),
            mismatches: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &SlabPool {
        &self.pool
    }

    /// Ask all workers to finish their current iteration and return
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Worker loop; returns once `stop()` is called
    pub fn run_worker(&self, worker: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scratch = vec![0u8; self.max_buffer_size];

        debug!(worker, "Soak worker started");
        while !self.is_stopped() {
            if let Err(e) = self.step(&mut rng, &mut scratch) {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(worker, error = %e, "Soak iteration failed");
            }
        }
        debug!(worker, "Soak worker stopped");
    }

    /// Run a fixed number of iterations on the calling thread
    pub fn run_iterations(&self, iterations: usize, seed: u64) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scratch = vec![0u8; self.max_buffer_size];
        for _ in 0..iterations {
            self.step(&mut rng, &mut scratch)?;
        }
        Ok(())
    }

    fn step(&self, rng: &mut StdRng, scratch: &mut [u8]) -> Result<()> {
        let size = rng.gen_range(0..=self.max_buffer_size);
        let pattern: u8 = rng.gen();
        let fill = &mut scratch[..size];
        fill.fill(pattern);

        let buffer = self.pool.allocate_filled(size, fill)?;
        self.verify(&buffer)?;
        self.iterations.fetch_add(1, Ordering::Relaxed);

        if rng.gen_bool(HANDOFF_PROBABILITY) {
            if let Err(rejected) = self.handoff.push(buffer) {
                rejected.dispose()?;
            } else {
                self.handoffs.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            buffer.dispose()?;
        }

        // Complete someone else's buffer
        if let Some(parked) = self.handoff.pop() {
            self.verify(&parked)?;
            parked.dispose()?;
        }

        Ok(())
    }

    /// Every byte of a soak buffer carries the same pattern
    fn verify(&self, buffer: &Buffer) -> Result<()> {
        let segments = buffer.segments()?;
        let mut expected = None;
        for segment in &segments {
            for &byte in segment.as_slice() {
                let pattern = *expected.get_or_insert(byte);
                if byte != pattern {
                    self.mismatches.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        slab = %segment.slab_id(),
                        offset = segment.offset(),
                        len = segment.len(),
                        "Buffer contents overwritten"
                    );
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Dispose everything still parked
    pub fn drain(&self) -> Result<()> {
        while let Some(parked) = self.handoff.pop() {
            parked.dispose()?;
        }
        Ok(())
    }

    pub fn report(&self, elapsed: Duration) -> SoakReport {
        SoakReport {
            elapsed_ms: elapsed.as_millis() as u64,
            iterations: self.iterations.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            pool: self.pool.stats(),
            metrics: METRICS.snapshot(),
        }
    }
}

/// Summary printed at the end of a soak run
#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    pub elapsed_ms: u64,
    pub iterations: u64,
    pub handoffs: u64,
    pub mismatches: u64,
    pub errors: u64,
    pub pool: PoolStats,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SoakConfig {
        SoakConfig {
            workers: 2,
            duration_secs: 0,
            max_buffer_size: 4096,
            handoff_capacity: 8,
            shrink_interval_ms: 10,
        }
    }

    #[test]
    fn test_iterations_leave_pool_clean() {
        let pool = SlabPool::with_capacity(0x20000, 1, 1).unwrap();
        let soak = Soak::new(pool.clone(), &config());

        soak.run_iterations(500, 7).unwrap();
        soak.drain().unwrap();

        let report = soak.report(Duration::from_millis(1));
        assert_eq!(report.iterations, 500);
        assert_eq!(report.mismatches, 0);
        assert_eq!(report.pool.bytes_reserved, 0);
    }

    #[test]
    fn test_workers_stop_on_request() {
        let pool = SlabPool::with_capacity(0x20000, 1, 2).unwrap();
        let soak = Soak::new(pool, &config());

        std::thread::scope(|s| {
            for worker in 0..2 {
                let soak = &soak;
                s.spawn(move || soak.run_worker(worker, worker as u64));
            }
            std::thread::sleep(Duration::from_millis(50));
            soak.stop();
        });
        soak.drain().unwrap();

        let report = soak.report(Duration::from_millis(50));
        assert_eq!(report.errors, 0);
        assert_eq!(report.mismatches, 0);
        assert_eq!(report.pool.bytes_reserved, 0);
    }

    #[test]
    fn test_max_buffer_size_clamped_to_slab() {
        let pool = SlabPool::with_capacity(0x20000, 1, 1).unwrap();
        let mut cfg = config();
        cfg.max_buffer_size = usize::MAX;

        let soak = Soak::new(pool, &cfg);
        assert_eq!(soak.max_buffer_size, 0x20000);
    }
}
