//! Network operations of one session: playlists, keys and segment bodies.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use lyra_net::{ByteStream, HttpClient, Net, NetExt, RetryPolicy};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::{HlsConfig, KeyOptions},
    error::HlsResult,
    keys::fetch_key,
    parsing::{MediaPlaylist, Playlist, parse_media_playlist, parse_playlist},
};

/// Query parameter carrying the reload counter.
pub const CACHE_BUST_PARAM: &str = "_lyra";

/// Cheap to clone; every network task gets its own copy.
#[derive(Clone)]
pub struct Fetcher {
    net: Arc<dyn Net>,
    keys: KeyOptions,
    retry: RetryPolicy,
    playlist_retries: u32,
    cache_bust: bool,
    reloads: Arc<AtomicU64>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("playlist_retries", &self.playlist_retries)
            .field("cache_bust", &self.cache_bust)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Fetcher over a fresh [`HttpClient`] whose requests are bounded by the
    /// configured timeout.
    pub fn new(config: &HlsConfig) -> HlsResult<Self> {
        let client = HttpClient::new(config.net.clone())?.with_timeout(config.net.request_timeout);
        Ok(Self::with_net(Arc::new(client), config))
    }

    pub fn with_net(net: Arc<dyn Net>, config: &HlsConfig) -> Self {
        Self {
            net,
            keys: config.keys.clone(),
            retry: config.net.retry_policy.clone(),
            playlist_retries: config.playlist_retries,
            cache_bust: config.cache_bust,
            reloads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Load the entry playlist, master or media.
    pub async fn load_playlist(&self, url: &Url) -> HlsResult<Playlist> {
        self.retrying(self.playlist_retries, || async move {
            let body = self.net.get_bytes(url.clone(), None).await?;
            parse_playlist(&body)
        })
        .await
    }

    /// Load a media playlist. Reloads carry the cache-busting parameter.
    pub async fn load_media(&self, url: &Url, reload: bool) -> HlsResult<MediaPlaylist> {
        let target = if reload { self.bust(url) } else { url.clone() };
        let target = &target;
        self.retrying(self.playlist_retries, || async move {
            let body = self.net.get_bytes(target.clone(), None).await?;
            parse_media_playlist(&body)
        })
        .await
    }

    pub async fn load_key(&self, url: &Url, iv: [u8; 16]) -> HlsResult<[u8; 16]> {
        self.retrying(self.retry.max_retries, move || {
            fetch_key(self.net.as_ref(), &self.keys, url, iv)
        })
        .await
    }

    /// Start a segment download. Retries are up to the caller.
    pub async fn open_segment(&self, url: &Url) -> HlsResult<ByteStream> {
        Ok(self.net.stream(url.clone(), None).await?)
    }

    fn bust(&self, url: &Url) -> Url {
        if !self.cache_bust {
            return url.clone();
        }
        let n = self.reloads.fetch_add(1, Ordering::Relaxed) + 1;
        let mut busted = url.clone();
        busted
            .query_pairs_mut()
            .append_pair(CACHE_BUST_PARAM, &n.to_string());
        busted
    }

    async fn retrying<T, F, Fut>(&self, retries: u32, mut op: F) -> HlsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HlsResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < retries && error.is_retryable() => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(attempt, %error, delay_ms = delay.as_millis(), "Fetcher: retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    debug!(attempt, %error, "Fetcher: giving up");
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use lyra_net::{Headers, NetError, NetOptions};
    use parking_lot::Mutex;

    use super::*;
    use crate::error::HlsError;

    const MEDIA: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\na.ts\n";

    /// Answers from a script, one entry per request, and records the URLs.
    struct Scripted {
        replies: Mutex<Vec<Result<&'static str, NetError>>>,
        urls: Mutex<Vec<Url>>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<&'static str, NetError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                urls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Net for Scripted {
        async fn get_bytes(&self, url: Url, _headers: Option<Headers>) -> Result<Bytes, NetError> {
            self.urls.lock().push(url);
            self.replies
                .lock()
                .pop()
                .unwrap_or(Err(NetError::http("script exhausted")))
                .map(|body| Bytes::from_static(body.as_bytes()))
        }

        async fn stream(&self, _url: Url, _headers: Option<Headers>) -> Result<ByteStream, NetError> {
            Err(NetError::http("not scripted"))
        }
    }

    fn config() -> HlsConfig {
        let fast = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        HlsConfig::new(Url::parse("http://media.test/live/index.m3u8").unwrap())
            .with_net(NetOptions::default().with_retry_policy(fast))
    }

    #[tokio::test]
    async fn playlist_retries_net_and_parse_failures() {
        let net = Scripted::new(vec![
            Err(NetError::http_error(503, config().url, None)),
            Ok("not a playlist"),
            Ok(MEDIA),
        ]);
        let fetcher = Fetcher::with_net(net.clone(), &config());
        let media = fetcher.load_media(&config().url, false).await.unwrap();
        assert_eq!(media.segments.len(), 1);
        assert_eq!(net.urls.lock().len(), 3);
    }

    #[tokio::test]
    async fn playlist_failure_surfaces_after_retries() {
        let net = Scripted::new(vec![Ok("junk"), Ok("junk"), Ok("junk"), Ok("junk"), Ok(MEDIA)]);
        let fetcher = Fetcher::with_net(net.clone(), &config());
        let result = fetcher.load_playlist(&config().url).await;
        assert!(matches!(result, Err(HlsError::PlaylistParse(_))));
        assert_eq!(net.urls.lock().len(), 4);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let net = Scripted::new(vec![Err(NetError::http_error(404, config().url, None))]);
        let fetcher = Fetcher::with_net(net.clone(), &config());
        assert!(fetcher.load_playlist(&config().url).await.is_err());
        assert_eq!(net.urls.lock().len(), 1);
    }

    #[tokio::test]
    async fn reloads_carry_cache_buster() {
        let net = Scripted::new(vec![Ok(MEDIA), Ok(MEDIA), Ok(MEDIA)]);
        let fetcher = Fetcher::with_net(net.clone(), &config());
        let url = config().url;
        fetcher.load_media(&url, false).await.unwrap();
        fetcher.load_media(&url, true).await.unwrap();
        fetcher.load_media(&url, true).await.unwrap();

        let urls: Vec<String> = net.urls.lock().iter().map(|u| u.to_string()).collect();
        assert_eq!(
            urls,
            [
                "http://media.test/live/index.m3u8",
                "http://media.test/live/index.m3u8?_lyra=1",
                "http://media.test/live/index.m3u8?_lyra=2",
            ]
        );
    }

    #[tokio::test]
    async fn cache_buster_can_be_disabled() {
        let net = Scripted::new(vec![Ok(MEDIA)]);
        let fetcher = Fetcher::with_net(net.clone(), &config().with_cache_bust(false));
        fetcher.load_media(&config().url, true).await.unwrap();
        assert_eq!(net.urls.lock()[0].query(), None);
    }
}
