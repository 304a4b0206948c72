//! Slabpool - slab-backed buffer pool for network I/O
//!
//! This library carves variable-sized buffers out of a small set of large,
//! pre-allocated slabs, so high-rate socket I/O never allocates buffer
//! memory on the hot path.
//!
//! ```
//! use slabpool::SlabPool;
//!
//! let pool = SlabPool::with_capacity(256 * 1024, 1, 1).unwrap();
//! let mut buf = pool.allocate(5).unwrap();
//! buf.copy_in(b"hello").unwrap();
//!
//! let segments = buf.segments().unwrap();
//! assert_eq!(segments[0].as_slice(), b"hello");
//! drop(segments);
//!
//! buf.dispose().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod soak;
pub mod util;

pub use config::{Config, PoolConfig};
pub use error::{PoolError, Result};
pub use pool::{Buffer, ReleasePolicy, Segment, SlabPool};

/// Crate version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
