//! Streaming AES-128-CBC decryption of segment bodies.

use aes::Aes128;
use cbc::{
    Decryptor,
    cipher::{
        BlockDecryptMut, KeyIvInit,
        block_padding::{NoPadding, Pkcs7},
    },
};
use tracing::trace;

use crate::{
    context::{AES_BLOCK_SIZE, DecryptContext},
    error::{DrmError, DrmResult},
};

/// Decrypt `data` in place; returns the plaintext length.
///
/// `data` must be block aligned. Intermediate chunks keep every byte and
/// advance `ctx.iv` to the last ciphertext block; the last chunk strips the
/// PKCS#7 padding.
pub fn aes128_cbc_process_chunk(
    data: &mut [u8],
    ctx: &mut DecryptContext,
    is_last: bool,
) -> DrmResult<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(DrmError::DecryptFailed(format!(
            "input length {} is not aligned to the AES block size",
            data.len()
        )));
    }

    let mut next_iv = [0u8; AES_BLOCK_SIZE];
    next_iv.copy_from_slice(&data[data.len() - AES_BLOCK_SIZE..]);

    let decryptor = Decryptor::<Aes128>::new((&ctx.key).into(), (&ctx.iv).into());
    let written = if is_last {
        decryptor
            .decrypt_padded_mut::<Pkcs7>(data)
            .map_err(|e| DrmError::DecryptFailed(format!("PKCS7 unpad failed: {e}")))?
            .len()
    } else {
        decryptor
            .decrypt_padded_mut::<NoPadding>(data)
            .map_err(|e| DrmError::DecryptFailed(format!("CBC decrypt failed: {e}")))?
            .len()
    };
    ctx.iv = next_iv;
    Ok(written)
}

/// Decrypts a segment body delivered in arbitrary chunks.
///
/// The newest complete block is always held back until [`finish`](Self::finish),
/// since only the final block carries padding.
#[derive(Debug)]
pub struct SegmentDecryptor {
    ctx: DecryptContext,
    pending: Vec<u8>,
    total_in: u64,
}

impl SegmentDecryptor {
    pub fn new(ctx: DecryptContext) -> Self {
        Self {
            ctx,
            pending: Vec::with_capacity(4 * AES_BLOCK_SIZE),
            total_in: 0,
        }
    }

    /// Feed ciphertext, appending whatever plaintext is ready to `out`.
    pub fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> DrmResult<()> {
        self.total_in += input.len() as u64;
        self.pending.extend_from_slice(input);

        let aligned = self.pending.len() - self.pending.len() % AES_BLOCK_SIZE;
        let ready = if aligned == self.pending.len() {
            aligned.saturating_sub(AES_BLOCK_SIZE)
        } else {
            aligned
        };
        if ready == 0 {
            return Ok(());
        }

        let start = out.len();
        out.extend_from_slice(&self.pending[..ready]);
        let written = aes128_cbc_process_chunk(&mut out[start..], &mut self.ctx, false)?;
        out.truncate(start + written);
        self.pending.drain(..ready);
        Ok(())
    }

    /// Decrypt the held-back tail and strip padding.
    pub fn finish(mut self, out: &mut Vec<u8>) -> DrmResult<()> {
        if self.pending.is_empty() && self.total_in == 0 {
            return Ok(());
        }
        if self.pending.len() != AES_BLOCK_SIZE {
            return Err(DrmError::DecryptFailed(format!(
                "segment length {} is not a multiple of the AES block size",
                self.total_in
            )));
        }
        let written = aes128_cbc_process_chunk(&mut self.pending, &mut self.ctx, true)?;
        out.extend_from_slice(&self.pending[..written]);
        trace!(encrypted = self.total_in, "SegmentDecryptor: finished");
        Ok(())
    }
}
