use std::collections::HashMap;

use bytes::Bytes;
use lyra_drm::DecryptContext;
use lyra_net::{Headers, Net};
use tracing::debug;
use url::Url;

use crate::{
    config::{KeyContext, KeyOptions},
    error::HlsResult,
};

/// AES-128 keys by key URL.
///
/// Entries live for the whole session; a failing segment is retried with
/// the key it already has.
#[derive(Debug, Default)]
pub struct KeyCache {
    keys: HashMap<Url, [u8; 16]>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &Url) -> Option<[u8; 16]> {
        self.keys.get(url).copied()
    }

    pub fn insert(&mut self, url: Url, key: [u8; 16]) {
        self.keys.insert(url, key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Fetch one key body, run it through the configured processor and check
/// its length.
pub async fn fetch_key<N: Net + ?Sized>(
    net: &N,
    options: &KeyOptions,
    url: &Url,
    iv: [u8; 16],
) -> HlsResult<[u8; 16]> {
    let mut fetch_url = url.clone();
    if let Some(ref params) = options.query_params {
        let mut pairs = fetch_url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    let headers = options.request_headers.clone().map(Headers::from);

    let raw = net.get_bytes(fetch_url, headers).await?;
    let key = process_key(options, raw, url.clone(), iv)?;
    let context = DecryptContext::from_key_bytes(&key, iv)?;
    debug!(url = %url, "keys: fetched");
    Ok(context.key)
}

fn process_key(options: &KeyOptions, key: Bytes, url: Url, iv: [u8; 16]) -> HlsResult<Bytes> {
    match options.key_processor {
        Some(ref processor) => processor(key, KeyContext { iv, url }),
        None => Ok(key),
    }
}
