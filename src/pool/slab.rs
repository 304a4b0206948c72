//! Slab byte store
//!
//! A fixed-capacity byte array plus a first-fit free list. Sub-ranges are
//! handed out as [`Region`]s; adjacent free runs coalesce on release.

use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{PoolError, Result};

/// Identifier of a slab within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlabId(u64);

impl SlabId {
    /// Create from raw u64
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slab-{}", self.0)
    }
}

/// Contiguous free run
#[derive(Debug, Clone, Copy)]
struct Run {
    offset: usize,
    len: usize,
}

impl Run {
    fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Free-list bookkeeping, guarded by the slab's mutex
struct FreeList {
    /// Free runs ordered by offset, never adjacent
    runs: Vec<Run>,
    /// Live reservations: offset -> len
    reserved: BTreeMap<usize, usize>,
    /// Set once by `try_retire`; a retired slab refuses reservations
    retired: bool,
}

impl FreeList {
    fn new(capacity: usize) -> Self {
        Self {
            runs: vec![Run {
                offset: 0,
                len: capacity,
            }],
            reserved: BTreeMap::new(),
            retired: false,
        }
    }

    fn reserve(&mut self, len: usize) -> Option<usize> {
        if self.retired || len == 0 {
            return None;
        }

        let idx = self.runs.iter().position(|run| run.len >= len)?;
        let run = &mut self.runs[idx];
        let offset = run.offset;
        if run.len == len {
            self.runs.remove(idx);
        } else {
            run.offset += len;
            run.len -= len;
        }

        self.reserved.insert(offset, len);
        Some(offset)
    }

    fn release(&mut self, offset: usize, len: usize) -> std::result::Result<(), &'static str> {
        match self.reserved.get(&offset) {
            Some(&reserved_len) if reserved_len == len => {}
            Some(_) => return Err("length does not match reservation"),
            None => return Err("region is not reserved"),
        }
        self.reserved.remove(&offset);

        let idx = self.runs.partition_point(|run| run.offset < offset);
        self.runs.insert(idx, Run { offset, len });

        if idx + 1 < self.runs.len() && self.runs[idx].end() == self.runs[idx + 1].offset {
            self.runs[idx].len += self.runs[idx + 1].len;
            self.runs.remove(idx + 1);
        }
        if idx > 0 && self.runs[idx - 1].end() == self.runs[idx].offset {
            self.runs[idx - 1].len += self.runs[idx].len;
            self.runs.remove(idx);
        }

        Ok(())
    }

    fn largest(&self) -> usize {
        self.runs.iter().map(|run| run.len).max().unwrap_or(0)
    }
}

/// A fixed-capacity byte store carved into regions
pub(crate) struct Slab {
    id: SlabId,
    capacity: usize,
    store: Box<[UnsafeCell<u8>]>,
    free: Mutex<FreeList>,
    /// Cached largest free run, readable without the free-list lock
    largest_free: AtomicUsize,
}

// The store is only touched through regions, and the free list never hands
// out overlapping regions.
unsafe impl Sync for Slab {}

impl Slab {
    /// Create a fully free slab
    pub(crate) fn new(id: SlabId, capacity: usize) -> Self {
        let zeroed = vec![0u8; capacity].into_boxed_slice();
        // SAFETY: UnsafeCell<u8> is repr(transparent) over u8.
        let store = unsafe { Box::from_raw(Box::into_raw(zeroed) as *mut [UnsafeCell<u8>]) };

        Self {
            id,
            capacity,
            store,
            free: Mutex::new(FreeList::new(capacity)),
            largest_free: AtomicUsize::new(capacity),
        }
    }

    pub fn id(&self) -> SlabId {
        self.id
    }

    /// Largest contiguous span currently reservable.
    ///
    /// Advisory: a concurrent reservation may shrink it before the caller
    /// acts on the value.
    pub fn largest_free_run(&self) -> usize {
        self.largest_free.load(Ordering::Acquire)
    }

    /// True when nothing is reserved
    pub fn is_fully_free(&self) -> bool {
        self.largest_free_run() == self.capacity
    }

    /// Total free bytes, possibly fragmented
    pub fn free_bytes(&self) -> usize {
        let free = self.free.lock();
        if free.retired {
            return 0;
        }
        free.runs.iter().map(|run| run.len).sum()
    }

    /// Reserve `len` bytes, first fit
    pub(crate) fn try_reserve(self: &Arc<Self>, len: usize) -> Option<Region> {
        let offset = {
            let mut free = self.free.lock();
            let offset = free.reserve(len)?;
            self.largest_free.store(free.largest(), Ordering::Release);
            offset
        };

        Some(Region {
            slab: Arc::clone(self),
            offset,
            len,
        })
    }

    /// Return a region issued by this slab to the free list
    pub(crate) fn release(&self, region: &Region) -> Result<()> {
        let failure = |reason| PoolError::ReleaseFailure {
            slab: self.id.as_u64(),
            offset: region.offset,
            len: region.len,
            reason,
        };

        // Ids repeat across pools; only the allocation itself is unique
        if !std::ptr::eq(Arc::as_ptr(&region.slab), self) {
            return Err(failure("region was issued by another slab"));
        }

        let mut free = self.free.lock();
        free.release(region.offset, region.len).map_err(failure)?;
        self.largest_free.store(free.largest(), Ordering::Release);
        Ok(())
    }

    /// Retire the slab if it is fully free.
    ///
    /// The check and the retirement happen under the free-list lock, so no
    /// reservation can slip in between. Returns false when something is
    /// still reserved.
    pub fn try_retire(&self) -> bool {
        let mut free = self.free.lock();
        if !free.reserved.is_empty() {
            return false;
        }
        free.retired = true;
        self.largest_free.store(0, Ordering::Release);
        true
    }

    /// Pointer to the first byte of the store
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.store.as_ptr())
    }
}

impl fmt::Debug for Slab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("largest_free", &self.largest_free_run())
            .finish()
    }
}

/// A reserved, exclusively owned sub-range of a slab
#[derive(Debug)]
pub(crate) struct Region {
    slab: Arc<Slab>,
    offset: usize,
    len: usize,
}

impl Region {
    /// Owning slab
    pub fn slab(&self) -> &Arc<Slab> {
        &self.slab
    }

    /// Start offset within the slab
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Pointer to the first byte of the region
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        // SAFETY: offset + len <= capacity is guaranteed by the free list.
        unsafe { self.slab.base_ptr().add(self.offset) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slab(capacity: usize) -> Arc<Slab> {
        Arc::new(Slab::new(SlabId::from_raw(1), capacity))
    }

    #[test]
    fn test_reserve_first_fit() {
        let slab = slab(100);

        let r1 = slab.try_reserve(10).unwrap();
        let r2 = slab.try_reserve(20).unwrap();
        assert_eq!(r1.offset(), 0);
        assert_eq!(r2.offset(), 10);
        assert_eq!(slab.largest_free_run(), 70);

        assert!(slab.try_reserve(71).is_none());
        assert!(slab.try_reserve(0).is_none());
    }

    #[test]
    fn test_release_coalesces() {
        let slab = slab(100);

        let r1 = slab.try_reserve(30).unwrap();
        let r2 = slab.try_reserve(30).unwrap();
        let r3 = slab.try_reserve(40).unwrap();
        assert_eq!(slab.largest_free_run(), 0);

        slab.release(&r1).unwrap();
        slab.release(&r3).unwrap();
        assert_eq!(slab.largest_free_run(), 40);

        // Middle release joins both neighbours
        slab.release(&r2).unwrap();
        assert_eq!(slab.largest_free_run(), 100);
        assert!(slab.is_fully_free());
    }

    #[test]
    fn test_release_reuses_hole() {
        let slab = slab(100);

        let r1 = slab.try_reserve(25).unwrap();
        let _r2 = slab.try_reserve(25).unwrap();
        slab.release(&r1).unwrap();

        let r3 = slab.try_reserve(20).unwrap();
        assert_eq!(r3.offset(), 0);
    }

    #[test]
    fn test_double_release_rejected() {
        let slab = slab(100);

        let r1 = slab.try_reserve(10).unwrap();
        slab.release(&r1).unwrap();
        let err = slab.release(&r1).unwrap_err();
        assert!(matches!(err, PoolError::ReleaseFailure { .. }));
        assert!(slab.is_fully_free());
    }

    #[test]
    fn test_foreign_region_rejected() {
        let a = slab(100);
        let b = Arc::new(Slab::new(SlabId::from_raw(2), 100));

        let region = b.try_reserve(10).unwrap();
        assert!(a.release(&region).is_err());
        assert!(b.release(&region).is_ok());
    }

    #[test]
    fn test_same_id_foreign_region_rejected() {
        // Two pools both number their first slab 0
        let a = Arc::new(Slab::new(SlabId::from_raw(0), 100));
        let b = Arc::new(Slab::new(SlabId::from_raw(0), 100));

        let live_a = a.try_reserve(10).unwrap();
        let from_b = b.try_reserve(10).unwrap();
        assert_eq!(live_a.offset(), from_b.offset());

        let err = a.release(&from_b).unwrap_err();
        assert!(matches!(err, PoolError::ReleaseFailure { .. }));
        assert!(!a.is_fully_free());

        let next = a.try_reserve(10).unwrap();
        assert_eq!(next.offset(), live_a.offset() + live_a.len());

        b.release(&from_b).unwrap();
        assert!(b.is_fully_free());
    }

    #[test]
    fn test_retire() {
        let slab = slab(100);

        let r1 = slab.try_reserve(10).unwrap();
        assert!(!slab.try_retire());

        slab.release(&r1).unwrap();
        assert!(slab.try_retire());
        assert!(slab.try_reserve(1).is_none());
        assert_eq!(slab.largest_free_run(), 0);
    }

    #[test]
    fn test_region_bytes_are_disjoint() {
        let slab = slab(64);

        let r1 = slab.try_reserve(16).unwrap();
        let r2 = slab.try_reserve(16).unwrap();
        // SAFETY: both regions are live and disjoint.
        unsafe {
            std::ptr::write_bytes(r1.as_ptr(), 0xAA, r1.len());
            std::ptr::write_bytes(r2.as_ptr(), 0x55, r2.len());
            assert_eq!(*r1.as_ptr().add(15), 0xAA);
            assert_eq!(*r2.as_ptr(), 0x55);
        }
    }
}
