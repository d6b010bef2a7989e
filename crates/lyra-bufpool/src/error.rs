use thiserror::Error;

/// Allocator errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Release targeted an interior allocation.
    #[error("allocation {id} is neither the oldest nor the newest outstanding item")]
    NotSupported { id: u64 },

    /// The handle belongs to another pool.
    #[error("allocation {id} belongs to pool {item_pool}, not pool {pool}")]
    ForeignItem { id: u64, item_pool: u64, pool: u64 },

    /// The allocation was already released (or never existed).
    #[error("allocation {id} is not outstanding")]
    UnknownItem { id: u64 },

    /// Growth requested on an allocation that is sealed or not the newest.
    #[error("allocation {id} cannot grow: {reason}")]
    NotGrowable { id: u64, reason: &'static str },

    /// Write past the allocated length.
    #[error("write of {requested} bytes exceeds remaining capacity {remaining}")]
    Overflow { requested: usize, remaining: usize },

    /// The pool lock is held elsewhere; retry.
    #[error("pool is busy")]
    WouldBlock,
}

pub type PoolResult<T> = Result<T, PoolError>;
