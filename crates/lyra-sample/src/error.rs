use lyra_bufpool::PoolError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("pool: {0}")]
    Pool(#[from] PoolError),

    #[error("timeline {0} was not established")]
    UnknownTimeline(usize),

    #[error("sample has no payload")]
    MissingPayload,
}

impl SampleError {
    /// Allocator misuse and missing timelines are programming faults.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SampleError::Pool(PoolError::WouldBlock))
    }
}

pub type SampleResult<T> = Result<T, SampleError>;
