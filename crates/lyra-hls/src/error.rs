use lyra_drm::DrmError;
use lyra_net::NetError;
use lyra_sample::SampleError;
use lyra_ts::TsError;
use thiserror::Error;

/// HLS orchestration errors.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Playlist parsing error: {0}")]
    PlaylistParse(String),

    #[error("Demux error: {0}")]
    Demux(#[from] TsError),

    #[error("Sample buffer error: {0}")]
    Pool(#[from] SampleError),

    #[error("Decryption error: {0}")]
    Drm(#[from] DrmError),

    #[error("Key processing failed: {0}")]
    KeyProcessing(String),

    #[error("Unsupported stream: {0}")]
    ProtocolViolation(String),

    #[error("Variant not found: {0}")]
    VariantNotFound(usize),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Source is closed")]
    Closed,
}

impl HlsError {
    /// Fatal errors end the session; the rest cost at most one segment.
    pub fn is_fatal(&self) -> bool {
        match self {
            HlsError::Net(_) | HlsError::Drm(_) | HlsError::KeyProcessing(_) => false,
            HlsError::Demux(error) => error.is_fatal(),
            HlsError::Pool(error) => error.is_fatal(),
            HlsError::PlaylistParse(_)
            | HlsError::ProtocolViolation(_)
            | HlsError::VariantNotFound(_)
            | HlsError::InvalidUrl(_)
            | HlsError::Cancelled
            | HlsError::Closed => true,
        }
    }

    /// Whether retrying the same request may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            HlsError::Net(error) => error.is_retryable(),
            HlsError::PlaylistParse(_) => true,
            _ => false,
        }
    }
}

impl From<url::ParseError> for HlsError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidUrl(error.to_string())
    }
}

pub type HlsResult<T> = Result<T, HlsError>;
