use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use derive_setters::Setters;
pub use lyra_abr::{AbrMode, AbrOptions};
use lyra_bufpool::PoolOptions;
use lyra_net::NetOptions;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::HlsResult;

#[derive(Clone, Debug)]
pub struct KeyContext {
    pub iv: [u8; 16],
    pub url: Url,
}

/// Callback for processing encryption keys.
pub type KeyProcessor = Arc<dyn Fn(Bytes, KeyContext) -> HlsResult<Bytes> + Send + Sync>;

/// What an external override gets to look at before a variant is used.
#[derive(Clone, Debug)]
pub struct VariantChoice {
    /// Declared bitrates, ascending.
    pub bitrates: Vec<u64>,
    pub current: Option<usize>,
    pub proposed: usize,
}

/// Externally driven variant switch. Returning `None` keeps the proposal.
pub type VariantOverride = Arc<dyn Fn(&VariantChoice) -> Option<usize> + Send + Sync>;

/// Encryption key handling configuration.
#[derive(Clone, Default)]
pub struct KeyOptions {
    /// Callback for processing (e.g. unwrapping) raw key bytes after fetch.
    pub key_processor: Option<KeyProcessor>,
    /// Query parameters to append to key URLs.
    pub query_params: Option<HashMap<String, String>>,
    /// Headers to include in key requests.
    pub request_headers: Option<HashMap<String, String>>,
}

impl fmt::Debug for KeyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOptions")
            .field(
                "key_processor",
                &self.key_processor.as_ref().map(|_| "KeyProcessor"),
            )
            .field("query_params", &self.query_params)
            .field("request_headers", &self.request_headers)
            .finish()
    }
}

impl KeyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query_params(mut self, params: HashMap<String, String>) -> Self {
        self.query_params = Some(params);
        self
    }

    pub fn with_request_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.request_headers = Some(headers);
        self
    }

    pub fn with_key_processor(mut self, processor: KeyProcessor) -> Self {
        self.key_processor = Some(processor);
        self
    }
}

/// Configuration for one HLS session.
#[derive(Clone, Setters)]
#[setters(prefix = "with_", strip_option)]
pub struct HlsConfig {
    /// Master (or single media) playlist URL.
    #[setters(skip)]
    pub url: Url,
    /// ABR configuration, including the bandwidth carried over from the
    /// previous session.
    pub abr: AbrOptions,
    /// Network configuration.
    pub net: NetOptions,
    /// Encryption key handling configuration.
    pub keys: KeyOptions,
    /// Buffered duration both streams need before samples are handed out.
    pub min_buffer_to_play: Duration,
    /// No new segment is started above this buffered duration.
    pub max_buffer_duration: Duration,
    /// No new segment is started above this many buffered payload bytes.
    pub max_buffer_bytes: usize,
    /// Download chunk size in 188-byte TS packets.
    pub chunk_packets: usize,
    /// Extra attempts for a failing segment before it is skipped.
    pub segment_retries: u32,
    /// Extra attempts for a failing playlist before the session fails.
    pub playlist_retries: u32,
    /// Failed segments in a row tolerated before the session fails.
    pub max_consecutive_read_failures: u32,
    /// Append a changing query parameter to playlist reloads.
    pub cache_bust: bool,
    /// Live sessions start this many segments before the end of the window.
    pub live_start_segments: usize,
    pub pool_block_size: usize,
    pub pool_initial_blocks: usize,
    pub pool_shrink_threshold: usize,
    pub command_channel_capacity: usize,
    pub events_channel_capacity: usize,
    /// Cancellation token for graceful shutdown.
    pub cancel: Option<CancellationToken>,
    pub variant_override: Option<VariantOverride>,
}

impl fmt::Debug for HlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HlsConfig")
            .field("url", &self.url.as_str())
            .field("abr", &self.abr)
            .field("net", &self.net)
            .field("keys", &self.keys)
            .field("min_buffer_to_play", &self.min_buffer_to_play)
            .field("max_buffer_duration", &self.max_buffer_duration)
            .field("chunk_packets", &self.chunk_packets)
            .field("segment_retries", &self.segment_retries)
            .field("playlist_retries", &self.playlist_retries)
            .field("cache_bust", &self.cache_bust)
            .finish_non_exhaustive()
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        let url = Url::parse("http://localhost/stream.m3u8").expect("valid default URL");
        Self::new(url)
    }
}

impl HlsConfig {
    pub fn new(url: Url) -> Self {
        let pool = PoolOptions::default();
        Self {
            url,
            abr: AbrOptions::default(),
            net: NetOptions::default(),
            keys: KeyOptions::default(),
            min_buffer_to_play: Duration::from_secs(3),
            max_buffer_duration: Duration::from_secs(30),
            max_buffer_bytes: 32 * 1024 * 1024,
            chunk_packets: 256,
            segment_retries: 2,
            playlist_retries: 3,
            max_consecutive_read_failures: 10,
            cache_bust: true,
            live_start_segments: 3,
            pool_block_size: pool.block_size,
            pool_initial_blocks: pool.initial_blocks,
            pool_shrink_threshold: pool.shrink_threshold,
            command_channel_capacity: 16,
            events_channel_capacity: 64,
            cancel: None,
            variant_override: None,
        }
    }

    /// Download chunk size in bytes, always a whole number of packets.
    pub fn chunk_size(&self) -> usize {
        self.chunk_packets.max(1) * lyra_ts::TS_PACKET_SIZE
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions::default()
            .with_block_size(self.pool_block_size)
            .with_initial_blocks(self.pool_initial_blocks)
            .with_shrink_threshold(self.pool_shrink_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = HlsConfig::default();
        assert_eq!(config.chunk_size(), 48_128);
        assert_eq!(config.segment_retries, 2);
        assert_eq!(config.playlist_retries, 3);
        assert_eq!(config.max_consecutive_read_failures, 10);
        assert!(config.cache_bust);
        assert!(config.abr.is_auto());
    }

    #[test]
    fn setters_chain() {
        let url = Url::parse("https://cdn.example/master.m3u8").unwrap();
        let config = HlsConfig::new(url.clone())
            .with_chunk_packets(0)
            .with_cache_bust(false)
            .with_cancel(CancellationToken::new())
            .with_abr(AbrOptions::default().with_initial_bandwidth(Some(4_000_000)));
        assert_eq!(config.url, url);
        assert_eq!(config.chunk_size(), 188);
        assert!(config.cancel.is_some());
        assert_eq!(config.abr.initial_bandwidth_bps, Some(4_000_000));
    }
}
