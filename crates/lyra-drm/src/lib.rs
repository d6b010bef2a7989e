//! AES-128-CBC decryption for HLS segments.
//!
//! [`SegmentDecryptor`] takes ciphertext in whatever chunks the network
//! delivers and yields plaintext as soon as it is safe to, holding back the
//! final block for PKCS#7 unpadding. [`iv_for_sequence`] and [`parse_iv`]
//! produce the IV from the media sequence number or the key tag attribute.

#![forbid(unsafe_code)]

mod context;
mod decrypt;
mod error;

pub use context::{AES_BLOCK_SIZE, DecryptContext, iv_for_sequence, parse_iv};
pub use decrypt::{SegmentDecryptor, aes128_cbc_process_chunk};
pub use error::{DrmError, DrmResult};
