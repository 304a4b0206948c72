//! Scatter/gather segment descriptors

use std::io::IoSlice;
use std::marker::PhantomData;
use std::sync::Arc;

use super::buffer::Lease;
use super::slab::{Slab, SlabId};
use crate::error::{PoolError, Result};

/// Largest absolute offset a single descriptor can address (positive i32 range)
pub const MAX_DESCRIPTOR_OFFSET: usize = i32::MAX as usize;

/// Translate a buffer-relative offset into an absolute slab offset.
///
/// Fails with [`PoolError::Overflow`] when the result does not fit the
/// descriptor addressing width.
pub fn descriptor_offset(region_start: usize, offset: usize) -> Result<usize> {
    let absolute = region_start
        .checked_add(offset)
        .ok_or(PoolError::Overflow { offset: usize::MAX })?;
    if absolute > MAX_DESCRIPTOR_OFFSET {
        return Err(PoolError::Overflow { offset: absolute });
    }
    Ok(absolute)
}

/// Keeps the described bytes alive
#[derive(Debug)]
enum Anchor {
    /// Zero-length view straight into a slab
    Slab(Arc<Slab>),
    /// View into a reserved region; the region stays reserved while held
    Lease(Arc<Lease>),
}

impl Anchor {
    fn slab(&self) -> &Arc<Slab> {
        match self {
            Anchor::Slab(slab) => slab,
            Anchor::Lease(lease) => lease.region().slab(),
        }
    }
}

/// `(slab, absolute offset, length)` view usable for vectored I/O
#[derive(Debug)]
pub struct Segment<'a> {
    anchor: Anchor,
    offset: usize,
    len: usize,
    _buffer: PhantomData<&'a ()>,
}

impl<'a> Segment<'a> {
    pub(crate) fn empty(slab: Arc<Slab>) -> Self {
        Self {
            anchor: Anchor::Slab(slab),
            offset: 0,
            len: 0,
            _buffer: PhantomData,
        }
    }

    pub(crate) fn leased(lease: Arc<Lease>, offset: usize, len: usize) -> Self {
        Self {
            anchor: Anchor::Lease(lease),
            offset,
            len,
            _buffer: PhantomData,
        }
    }

    /// Slab whose store backs this segment
    pub fn slab_id(&self) -> SlabId {
        self.anchor.slab().id()
    }

    /// Absolute offset into the slab store
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute byte range within the slab
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Bytes described by this segment
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the anchor keeps the region reserved, so no other buffer
        // can be handed these bytes; writers through the owning buffer need
        // `&mut`, which the `'a` borrow excludes.
        unsafe {
            std::slice::from_raw_parts(self.anchor.slab().base_ptr().add(self.offset), self.len)
        }
    }

    /// Segment as a vectored-write slice
    pub fn as_io_slice(&self) -> IoSlice<'_> {
        IoSlice::new(self.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_offset_within_range() {
        assert_eq!(descriptor_offset(100, 28).unwrap(), 128);
        assert_eq!(descriptor_offset(MAX_DESCRIPTOR_OFFSET, 0).unwrap(), MAX_DESCRIPTOR_OFFSET);
    }

    #[test]
    fn test_descriptor_offset_overflow() {
        let err = descriptor_offset(MAX_DESCRIPTOR_OFFSET, 1).unwrap_err();
        assert_eq!(
            err,
            PoolError::Overflow {
                offset: MAX_DESCRIPTOR_OFFSET + 1
            }
        );
        assert!(descriptor_offset(usize::MAX, 1).is_err());
    }
}
