use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
#[cfg(test)]
use unimock::unimock;
use url::Url;

use crate::{
    error::NetError,
    retry::{DefaultRetryPolicy, RetryNet},
    timeout::TimeoutNet,
    types::{Headers, RetryPolicy},
};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetError>> + Send>>;

#[cfg_attr(test, unimock(api = NetMock))]
#[async_trait]
pub trait Net: Send + Sync {
    /// Get the whole body.
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError>;

    /// Start a request and hand back the body as it arrives.
    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError>;
}

#[async_trait]
impl<T: Net + ?Sized> Net for Arc<T> {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        (**self).get_bytes(url, headers).await
    }

    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        (**self).stream(url, headers).await
    }
}

pub trait NetExt: Net + Sized {
    /// Bound the request phase of every call.
    fn with_timeout(self, timeout: Duration) -> TimeoutNet<Self> {
        TimeoutNet::new(self, timeout)
    }

    /// Retry retryable failures with exponential backoff.
    fn with_retry(self, policy: RetryPolicy) -> RetryNet<Self, DefaultRetryPolicy> {
        RetryNet::new(self, DefaultRetryPolicy::new(policy))
    }
}

impl<T: Net> NetExt for T {}
