use lyra_sample::SampleError;
use thiserror::Error;

/// Bit-level read failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitstreamError {
    #[error("cannot read {requested} bits at once (max {max})")]
    OutOfRange { requested: u32, max: u32 },

    #[error("no backing buffer")]
    NoBuffer,

    #[error("needed {needed} bits, {available} available")]
    Exhausted { needed: u64, available: u64 },

    #[error("invalid exp-Golomb code")]
    InvalidGolomb,
}

/// Demux and framing errors.
#[derive(Debug, Error)]
pub enum TsError {
    #[error("bitstream: {0}")]
    Bitstream(#[from] BitstreamError),

    /// Malformed header or table; recovered by a PID-local discontinuity flush.
    #[error("parse error: {0}")]
    Parse(String),

    /// Stream configuration this demuxer does not support; always fatal.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A framer broke its contract with the parser base.
    #[error("internal consistency fault: {0}")]
    Internal(String),

    #[error("sample buffer: {0}")]
    Sample(#[from] SampleError),
}

impl TsError {
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    /// Errors that must stop playback instead of flushing one PID.
    pub fn is_fatal(&self) -> bool {
        match self {
            TsError::ProtocolViolation(_) | TsError::Internal(_) => true,
            TsError::Sample(error) => error.is_fatal(),
            TsError::Bitstream(_) | TsError::Parse(_) => false,
        }
    }
}

pub type BitstreamResult<T> = Result<T, BitstreamError>;
pub type TsResult<T> = Result<T, TsError>;
