use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::{ByteStream, error::NetError, traits::Net, types::Headers};

/// Bounds the request phase of the wrapped transport.
///
/// For [`Net::stream`] only the time to the first response is bounded, not
/// the body.
pub struct TimeoutNet<N> {
    inner: N,
    timeout: Duration,
}

impl<N: Net> TimeoutNet<N> {
    pub fn new(inner: N, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<N: Net> Net for TimeoutNet<N> {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        tokio::time::timeout(self.timeout, self.inner.get_bytes(url, headers))
            .await
            .map_err(|_| NetError::timeout())?
    }

    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        tokio::time::timeout(self.timeout, self.inner.stream(url, headers))
            .await
            .map_err(|_| NetError::timeout())?
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use unimock::{MockFn, Unimock, matching};

    use super::*;
    use crate::traits::NetMock;

    fn url() -> Url {
        Url::parse("http://test.local/a.m3u8").unwrap()
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn stalled_request_times_out() {
        let net = TimeoutNet::new(Stalled, Duration::from_millis(50));
        assert!(matches!(net.get_bytes(url(), None).await, Err(NetError::Timeout)));
        assert!(matches!(net.stream(url(), None).await, Err(NetError::Timeout)));
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn fast_request_passes_through() {
        let mock = Unimock::new(
            NetMock::get_bytes
                .some_call(matching!(_, _))
                .returns(Ok(Bytes::from_static(b"ok"))),
        );
        let net = TimeoutNet::new(mock, Duration::from_secs(1));
        assert_eq!(net.get_bytes(url(), None).await.unwrap(), "ok");
    }

    /// Never answers.
    struct Stalled;

    #[async_trait]
    impl Net for Stalled {
        async fn get_bytes(&self, _url: Url, _headers: Option<Headers>) -> Result<Bytes, NetError> {
            std::future::pending().await
        }

        async fn stream(&self, _url: Url, _headers: Option<Headers>) -> Result<ByteStream, NetError> {
            std::future::pending().await
        }
    }
}
