//! Slab-backed buffer pool
//!
//! Large pre-allocated slabs carved into variable-sized buffers for network
//! I/O, so the hot path never allocates buffer memory.

mod buffer;
mod policy;
mod segment;
mod slab;
mod slab_pool;

pub use buffer::Buffer;
pub use policy::ReleasePolicy;
pub use segment::{descriptor_offset, Segment, MAX_DESCRIPTOR_OFFSET};
pub use slab::SlabId;
pub use slab_pool::{PoolStats, SlabPool, MIN_SLAB_CAPACITY};
