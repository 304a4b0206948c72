//! Concurrent allocation/disposal stress tests

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;

use slabpool::pool::{SlabId, MIN_SLAB_CAPACITY};
use slabpool::{Buffer, SlabPool};

const CAP: usize = MIN_SLAB_CAPACITY;

/// Live byte ranges keyed by (slab, start) -> end
#[derive(Default)]
struct LiveRanges {
    ranges: Mutex<BTreeMap<(SlabId, usize), usize>>,
}

impl LiveRanges {
    /// Register every segment of `buf`, panicking on overlap
    fn claim(&self, buf: &Buffer) {
        let mut ranges = self.ranges.lock();
        for seg in buf.segments().unwrap() {
            if seg.is_empty() {
                continue;
            }
            let range = seg.range();
            let slab = seg.slab_id();

            if let Some((&(prev_slab, prev_start), &prev_end)) =
                ranges.range(..=(slab, range.start)).next_back()
            {
                assert!(
                    prev_slab != slab || prev_end <= range.start,
                    "{slab}: {range:?} overlaps live {prev_start}..{prev_end}"
                );
            }
            if let Some((&(next_slab, next_start), _)) =
                ranges.range((slab, range.start + 1)..).next()
            {
                assert!(
                    next_slab != slab || next_start >= range.end,
                    "{slab}: {range:?} overlaps live range starting at {next_start}"
                );
            }
            ranges.insert((slab, range.start), range.end);
        }
    }

    fn release(&self, buf: &Buffer) {
        let mut ranges = self.ranges.lock();
        for seg in buf.segments().unwrap() {
            if !seg.is_empty() {
                ranges.remove(&(seg.slab_id(), seg.range().start));
            }
        }
    }
}

#[test]
fn test_live_buffers_never_overlap() {
    let pool = SlabPool::with_capacity(CAP, 1, 2).unwrap();
    let live = Arc::new(LiveRanges::default());

    std::thread::scope(|s| {
        for worker in 0..8u64 {
            let pool = pool.clone();
            let live = Arc::clone(&live);
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker);
                let mut held: Vec<Buffer> = Vec::new();

                for _ in 0..2_000 {
                    if held.len() < 16 && rng.gen_bool(0.6) {
                        let size = rng.gen_range(0..=CAP / 8);
                        let buf = pool.allocate(size).unwrap();
                        live.claim(&buf);
                        held.push(buf);
                    } else if !held.is_empty() {
                        let buf = held.swap_remove(rng.gen_range(0..held.len()));
                        live.release(&buf);
                        buf.dispose().unwrap();
                    }
                }

                for buf in held {
                    live.release(&buf);
                    buf.dispose().unwrap();
                }
            });
        }

        // Shrink concurrently, as an external policy would
        let pool = pool.clone();
        s.spawn(move || {
            for _ in 0..200 {
                pool.shrink();
                std::thread::yield_now();
            }
        });
    });

    assert!(live.ranges.lock().is_empty());
    let stats = pool.stats();
    assert_eq!(stats.bytes_reserved, 0);
    assert_eq!(stats.fully_free_slabs, stats.slab_count);
}

#[test]
fn test_contents_survive_concurrent_traffic() {
    let pool = SlabPool::with_capacity(CAP, 2, 1).unwrap();

    std::thread::scope(|s| {
        for worker in 0..6u8 {
            let pool = pool.clone();
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker as u64 + 100);
                for _ in 0..1_000 {
                    let size = rng.gen_range(1..=4096);
                    let fill = vec![worker; size];
                    let buf = pool.allocate_filled(size, &fill).unwrap();
                    std::thread::yield_now();
                    assert_eq!(&buf.to_bytes().unwrap()[..], &fill[..]);
                    buf.dispose().unwrap();
                }
            });
        }
    });

    assert_eq!(pool.stats().bytes_reserved, 0);
}

#[test]
fn test_racing_dispose_releases_once() {
    let pool = SlabPool::with_capacity(CAP, 1, 1).unwrap();

    for _ in 0..200 {
        let buf = Arc::new(pool.allocate(1024).unwrap());
        std::thread::scope(|s| {
            for _ in 0..4 {
                let buf = Arc::clone(&buf);
                s.spawn(move || buf.dispose().unwrap());
            }
        });
        assert!(buf.is_disposed());
        assert_eq!(pool.stats().bytes_reserved, 0);
    }
}

#[test]
fn test_concurrent_exhaustion_grows_once() {
    let batch = 3;
    let pool = SlabPool::with_capacity(CAP, 1, batch).unwrap();
    let _full = pool.allocate(CAP).unwrap();

    // Every racer needs a small region; one batch covers them all
    let barrier = std::sync::Barrier::new(batch);
    let held = Mutex::new(Vec::new());
    std::thread::scope(|s| {
        for _ in 0..batch {
            s.spawn(|| {
                barrier.wait();
                held.lock().push(pool.allocate(1024).unwrap());
            });
        }
    });

    assert_eq!(held.lock().len(), batch);
    assert_eq!(pool.slab_count(), 1 + batch);
}
