//! Pool error types

/// Result alias used throughout the pool
pub type Result<T, E = PoolError> = core::result::Result<T, E>;

/// Errors surfaced by the pool and its buffer handles
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Bad constructor parameter or inconsistent copy/fill length
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a disposed buffer
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Segment offset/length outside the buffer
    #[error("segment range {offset}+{len} out of range for buffer of {size} bytes")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Absolute segment offset does not fit a single descriptor
    #[error("absolute segment offset {offset} exceeds descriptor addressing width")]
    Overflow { offset: usize },

    /// A slab refused to take back a region
    #[error("slab {slab} failed to release region at {offset} ({len} bytes): {reason}")]
    ReleaseFailure {
        slab: u64,
        offset: usize,
        len: usize,
        reason: &'static str,
    },

    /// Request larger than a single slab can ever hold
    #[error("requested {requested} bytes but slabs hold at most {capacity}")]
    RequestTooLarge { requested: usize, capacity: usize },
}

impl PoolError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
