//! Key and IV material for one encrypted segment.

use crate::error::{DrmError, DrmResult};

pub const AES_BLOCK_SIZE: usize = 16;

/// AES-128-CBC key and initialization vector.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct DecryptContext {
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

impl DecryptContext {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Build from a fetched key body, which must be exactly 16 bytes.
    pub fn from_key_bytes(key: &[u8], iv: [u8; 16]) -> DrmResult<Self> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| DrmError::InvalidKeyLength(key.len()))?;
        Ok(Self { key, iv })
    }
}

/// IV used when the key tag carries none: the media sequence number as a
/// 128-bit big-endian integer.
pub fn iv_for_sequence(sequence: u64) -> [u8; 16] {
    u128::from(sequence).to_be_bytes()
}

/// Parse a `0x`-prefixed hexadecimal IV attribute.
///
/// Shorter literals are left-padded with zeros, as the attribute is an
/// integer.
pub fn parse_iv(literal: &str) -> DrmResult<[u8; 16]> {
    let digits = literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
        .ok_or_else(|| DrmError::InvalidIv(format!("missing 0x prefix in {literal:?}")))?;
    if digits.is_empty() || digits.len() > 32 {
        return Err(DrmError::InvalidIv(format!(
            "expected 1 to 32 hex digits, got {}",
            digits.len()
        )));
    }
    let padded = format!("{digits:0>32}");
    let bytes = hex::decode(&padded).map_err(|e| DrmError::InvalidIv(e.to_string()))?;
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&bytes);
    Ok(iv)
}
