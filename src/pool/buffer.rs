//! Buffer handles
//!
//! A [`Buffer`] is a view over zero or more reserved slab regions. It exposes
//! segment descriptors for vectored I/O, bulk copy in and out, and releases
//! its regions exactly once on disposal.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::io::IoSliceMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::policy::ReleasePolicy;
use super::segment::{descriptor_offset, Segment};
use super::slab::{Region, Slab};
use crate::error::{PoolError, Result};
use crate::metrics::METRICS;

/// Ownership of one reserved region.
///
/// Shared between a buffer and the segments it hands out; the region goes
/// back to its slab when the last holder lets go.
#[derive(Debug)]
pub(crate) struct Lease {
    region: Region,
    policy: ReleasePolicy,
    released: bool,
}

impl Lease {
    fn new(region: Region, policy: ReleasePolicy) -> Self {
        Self {
            region,
            policy,
            released: false,
        }
    }

    pub(crate) fn region(&self) -> &Region {
        &self.region
    }

    /// Release with the outcome returned to the caller
    fn release(mut self) -> Result<()> {
        self.give_back()
    }

    fn give_back(&mut self) -> Result<()> {
        self.released = true;
        let outcome = self.region.slab().release(&self.region);
        if outcome.is_ok() {
            METRICS.buffer_released();
        }
        outcome
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            let outcome = self.give_back();
            self.policy.handle_detached(outcome);
        }
    }
}

/// What a live buffer is bound to
#[derive(Debug, Clone)]
enum Extent {
    /// Zero-length buffer; the slab only backs the empty descriptor
    Empty(Arc<Slab>),
    /// One region in one slab
    Single(Arc<Lease>),
    /// Regions in order, possibly across slabs
    Multi(Vec<Arc<Lease>>),
}

impl Extent {
    fn leases(&self) -> &[Arc<Lease>] {
        match self {
            Extent::Empty(_) => &[],
            Extent::Single(lease) => std::slice::from_ref(lease),
            Extent::Multi(leases) => leases,
        }
    }

    fn into_leases(self) -> Vec<Arc<Lease>> {
        match self {
            Extent::Empty(_) => Vec::new(),
            Extent::Single(lease) => vec![lease],
            Extent::Multi(leases) => leases,
        }
    }
}

/// A buffer carved from the pool
pub struct Buffer {
    size: usize,
    segment_count: usize,
    /// `None` once disposed
    extent: Mutex<Option<Extent>>,
    disposed: AtomicBool,
    policy: ReleasePolicy,
}

impl Buffer {
    /// Zero-length buffer backed by `slab` for descriptor purposes only
    pub(crate) fn unbound(slab: Arc<Slab>) -> Self {
        Self {
            size: 0,
            segment_count: 1,
            extent: Mutex::new(Some(Extent::Empty(slab))),
            disposed: AtomicBool::new(false),
            policy: ReleasePolicy::default(),
        }
    }

    /// Buffer over `regions`, in order.
    ///
    /// A single region does not allocate a lease list.
    pub(crate) fn bound<I>(regions: I, policy: ReleasePolicy) -> Result<Self>
    where
        I: IntoIterator<Item = Region>,
    {
        let mut regions = regions.into_iter();
        let first = regions
            .next()
            .ok_or_else(|| PoolError::invalid_argument("bound buffer needs at least one region"))?;

        let extent = match regions.next() {
            None => Extent::Single(Arc::new(Lease::new(first, policy))),
            Some(second) => Extent::Multi(
                [first, second]
                    .into_iter()
                    .chain(regions)
                    .map(|region| Arc::new(Lease::new(region, policy)))
                    .collect(),
            ),
        };

        let leases = extent.leases();
        let size = leases.iter().map(|lease| lease.region.len()).sum();
        let segment_count = leases.len();

        Ok(Self {
            size,
            segment_count,
            extent: Mutex::new(Some(extent)),
            disposed: AtomicBool::new(false),
            policy,
        })
    }

    /// Buffer length in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of descriptors a full-range `segments()` call yields
    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Descriptors covering the whole buffer
    pub fn segments(&self) -> Result<Vec<Segment<'_>>> {
        self.segments_range(0, self.size)
    }

    /// Descriptors covering the first `len` bytes
    pub fn segments_to(&self, len: usize) -> Result<Vec<Segment<'_>>> {
        self.segments_range(0, len)
    }

    /// Descriptors covering `len` bytes starting at `offset`
    pub fn segments_range(&self, offset: usize, len: usize) -> Result<Vec<Segment<'_>>> {
        let extent = self.snapshot()?;
        check_range(offset, len, self.size)?;

        if let Extent::Empty(slab) = &extent {
            return Ok(vec![Segment::empty(Arc::clone(slab))]);
        }

        let mut segments = Vec::with_capacity(self.segment_count);
        let mut skip = offset;
        let mut remaining = len;
        for lease in extent.leases() {
            let region_len = lease.region.len();
            if skip >= region_len {
                skip -= region_len;
                continue;
            }

            let take = remaining.min(region_len - skip);
            let absolute = descriptor_offset(lease.region.offset(), skip)?;
            segments.push(Segment::leased(Arc::clone(lease), absolute, take));

            remaining -= take;
            skip = 0;
            if remaining == 0 {
                break;
            }
        }

        Ok(segments)
    }

    /// Mutable slices over the buffer, for vectored reads
    pub fn io_slices_mut(&mut self) -> Result<Vec<IoSliceMut<'_>>> {
        if self.is_disposed() {
            return Err(PoolError::InvalidState("buffer is disposed"));
        }
        let Some(extent) = self.extent.get_mut().as_ref() else {
            return Err(PoolError::InvalidState("buffer is disposed"));
        };

        if let Extent::Empty(_) = extent {
            return Ok(vec![IoSliceMut::new(&mut [])]);
        }

        Ok(extent
            .leases()
            .iter()
            .map(|lease| {
                // SAFETY: the region is exclusively ours and `&mut self`
                // rules out any other view of it for the slice lifetime.
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(lease.region.as_ptr(), lease.region.len())
                };
                IoSliceMut::new(bytes)
            })
            .collect())
    }

    /// Copy the whole buffer into the front of `dest`
    pub fn copy_out(&self, dest: &mut [u8]) -> Result<()> {
        self.copy_out_range(dest, 0, self.size)
    }

    /// Copy the first `len` bytes of the buffer into `dest[dest_index..]`
    pub fn copy_out_range(&self, dest: &mut [u8], dest_index: usize, len: usize) -> Result<()> {
        let extent = self.snapshot()?;
        if len > self.size {
            return Err(PoolError::invalid_argument(format!(
                "copy length {len} exceeds buffer size {}",
                self.size
            )));
        }
        if self.size == 0 {
            return Ok(());
        }
        let dest_len = dest.len();
        let dest = dest_index
            .checked_add(len)
            .and_then(|end| dest.get_mut(dest_index..end))
            .ok_or_else(|| {
                PoolError::invalid_argument(format!(
                    "destination of {dest_len} bytes cannot take {len} bytes at {dest_index}"
                ))
            })?;

        let mut copied = 0;
        for lease in extent.leases() {
            if copied == len {
                break;
            }
            let take = (len - copied).min(lease.region.len());
            // SAFETY: the snapshot holds the lease, so the region stays ours;
            // writers need `&mut self`, which our `&self` excludes.
            let src = unsafe { std::slice::from_raw_parts(lease.region.as_ptr(), take) };
            dest[copied..copied + take].copy_from_slice(src);
            copied += take;
        }

        Ok(())
    }

    /// Fill the front of the buffer with all of `src`
    pub fn copy_in(&mut self, src: &[u8]) -> Result<()> {
        self.copy_in_range(src, 0, src.len())
    }

    /// Copy `len` bytes of `src[src_index..]` into the front of the buffer.
    ///
    /// `len` is checked against `src_index + size()` first; the buffer and
    /// source bounds are then enforced separately.
    pub fn copy_in_range(&mut self, src: &[u8], src_index: usize, len: usize) -> Result<()> {
        if self.is_disposed() {
            return Err(PoolError::InvalidState("buffer is disposed"));
        }
        if len > src_index.saturating_add(self.size) {
            return Err(PoolError::invalid_argument(format!(
                "copy length {len} exceeds source index {src_index} plus buffer size {}",
                self.size
            )));
        }
        if self.size == 0 {
            return Ok(());
        }
        if len > self.size {
            return Err(PoolError::invalid_argument(format!(
                "copy length {len} exceeds buffer size {}",
                self.size
            )));
        }
        let src = src_index
            .checked_add(len)
            .and_then(|end| src.get(src_index..end))
            .ok_or_else(|| {
                PoolError::invalid_argument(format!(
                    "source of {} bytes has no {len} bytes at {src_index}",
                    src.len()
                ))
            })?;

        let Some(extent) = self.extent.get_mut().as_ref() else {
            return Err(PoolError::InvalidState("buffer is disposed"));
        };

        let mut copied = 0;
        for lease in extent.leases() {
            if copied == len {
                break;
            }
            let take = (len - copied).min(lease.region.len());
            // SAFETY: the region is exclusively ours and `&mut self` rules
            // out any outstanding segment borrowing it.
            let dest = unsafe { std::slice::from_raw_parts_mut(lease.region.as_ptr(), take) };
            dest.copy_from_slice(&src[copied..copied + take]);
            copied += take;
        }

        Ok(())
    }

    /// Owned copy of the buffer contents
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut out = vec![0u8; self.size];
        self.copy_out(&mut out)?;
        Ok(Bytes::from(out))
    }

    /// Return the bound regions to their slabs.
    ///
    /// Safe to call any number of times from any number of threads; exactly
    /// one call performs the release. Regions still referenced by live
    /// segments are released when the last segment is dropped.
    pub fn dispose(&self) -> Result<()> {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let Some(extent) = self.extent.lock().take() else {
            return Ok(());
        };

        let mut outcome = Ok(());
        for lease in extent.into_leases() {
            // A segment still holds it: its drop releases the region
            let Ok(lease) = Arc::try_unwrap(lease) else {
                continue;
            };
            let released = self.policy.handle(lease.release());
            if outcome.is_ok() {
                outcome = released;
            }
        }
        outcome
    }

    /// Clone of the current extent, or `InvalidState` once disposed
    fn snapshot(&self) -> Result<Extent> {
        if self.is_disposed() {
            return Err(PoolError::InvalidState("buffer is disposed"));
        }
        self.extent
            .lock()
            .clone()
            .ok_or(PoolError::InvalidState("buffer is disposed"))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::error!(error = %e, "Buffer release failed on drop");
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size)
            .field("segment_count", &self.segment_count)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Validate a segment request against the buffer size
fn check_range(offset: usize, len: usize, size: usize) -> Result<()> {
    let fits = offset
        .checked_add(len)
        .map_or(false, |end| end <= size);
    let starts_inside = size == 0 || offset < size;
    if fits && starts_inside {
        Ok(())
    } else {
        Err(PoolError::OutOfRange { offset, len, size })
    }
}
