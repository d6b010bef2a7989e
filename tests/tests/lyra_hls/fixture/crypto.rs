use aes::Aes128;
use cbc::{
    Encryptor,
    cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
};

pub(crate) const TEST_KEY: [u8; 16] = *b"lyra-test-key-16";

/// AES-128-CBC with PKCS#7 padding, as a packager would write a segment.
pub(crate) fn encrypt_aes128_cbc(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    Encryptor::<Aes128>::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plain)
}

/// Reversible key wrapping used to exercise the key processor.
pub(crate) fn wrap_key(key: &[u8; 16]) -> Vec<u8> {
    key.iter().map(|b| b ^ 0x5a).collect()
}
