use thiserror::Error;

/// Segment decryption errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DrmError {
    #[error("AES-128-CBC decryption failed: {0}")]
    DecryptFailed(String),

    #[error("invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid IV: {0}")]
    InvalidIv(String),

    #[error("key processing failed: {0}")]
    KeyProcessing(String),
}

pub type DrmResult<T> = Result<T, DrmError>;
