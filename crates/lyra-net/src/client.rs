use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{
    Client,
    header::{CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA},
};
use tracing::{debug, trace};
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::{Headers, NetOptions},
};

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    /// # Errors
    ///
    /// [`NetError::Setup`] if the TLS backend cannot be initialized.
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let mut defaults = HeaderMap::new();
        if options.bypass_cache {
            defaults.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            defaults.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let mut builder = Client::builder()
            .use_rustls_tls()
            .default_headers(defaults)
            .connect_timeout(options.request_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host);
        if let Some(agent) = &options.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let inner = builder
            .build()
            .map_err(|e| NetError::Setup(e.to_string()))?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: Option<Headers>,
    ) -> reqwest::RequestBuilder {
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }
        req
    }

    async fn send(&self, url: Url, headers: Option<Headers>) -> NetResult<reqwest::Response> {
        let req = Self::apply_headers(self.inner.get(url.clone()), headers);
        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();
        trace!(%url, status = status.as_u16(), "HttpClient: response");

        if !status.is_success() {
            let body = resp.text().await.ok().filter(|b| !b.is_empty());
            debug!(%url, status = status.as_u16(), "HttpClient: request failed");
            return Err(NetError::http_error(status.as_u16(), url, body));
        }
        Ok(resp)
    }

    /// # Errors
    ///
    /// [`NetError`] on HTTP failure, timeout, or network error.
    pub async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> NetResult<Bytes> {
        <Self as Net>::get_bytes(self, url, headers).await
    }

    /// # Errors
    ///
    /// [`NetError`] on HTTP failure or network error.
    pub async fn stream(&self, url: Url, headers: Option<Headers>) -> NetResult<ByteStream> {
        <Self as Net>::stream(self, url, headers).await
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        let resp = self.send(url, headers).await?;
        resp.bytes().await.map_err(NetError::from)
    }

    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        // No overall timeout: a segment body may legitimately take longer
        // than the request phase.
        let resp = self.send(url, headers).await?;
        let stream = resp.bytes_stream().map_err(NetError::from);
        Ok(Box::pin(stream))
    }
}
