use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::sleep;
use tracing::debug;
#[cfg(test)]
use unimock::unimock;
use url::Url;

use crate::{
    ByteStream,
    error::NetError,
    traits::Net,
    types::{Headers, RetryPolicy},
};

#[cfg_attr(test, unimock(api = RetryPolicyMock))]
pub trait RetryPolicyTrait: Send + Sync {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool;
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
    fn max_attempts(&self) -> u32;
}

/// Retries [`NetError::is_retryable`] failures up to
/// [`RetryPolicy::max_retries`] times.
#[derive(Clone, Debug)]
pub struct DefaultRetryPolicy {
    policy: RetryPolicy,
}

impl DefaultRetryPolicy {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn should_retry(&self, error: &NetError, attempt: u32) -> bool {
        attempt < self.policy.max_retries && error.is_retryable()
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.policy.delay_for_attempt(attempt)
    }
}

impl RetryPolicyTrait for DefaultRetryPolicy {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool {
        self.should_retry(error, attempt)
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_for_attempt(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_retries
    }
}

/// Retry decorator for [`Net`] implementations.
///
/// Only the request phase of [`Net::stream`] is retried; a body that fails
/// halfway is the caller's to restart.
pub struct RetryNet<N, P> {
    inner: N,
    retry_policy: P,
}

impl<N: Net, P: RetryPolicyTrait> RetryNet<N, P> {
    pub fn new(inner: N, retry_policy: P) -> Self {
        Self {
            inner,
            retry_policy,
        }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, url: &Url, mut call: F) -> Result<T, NetError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, NetError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.retry_policy.should_retry(&error, attempt) {
                        if attempt == 0 || !error.is_retryable() {
                            return Err(error);
                        }
                        return Err(NetError::RetryExhausted {
                            max_retries: attempt,
                            source: Box::new(error),
                        });
                    }
                    attempt += 1;
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    debug!(%url, attempt, ?delay, %error, "RetryNet: retrying");
                    sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl<N: Net, P: RetryPolicyTrait> Net for RetryNet<N, P> {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        self.run(&url, || self.inner.get_bytes(url.clone(), headers.clone()))
            .await
    }

    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        self.run(&url, || self.inner.stream(url.clone(), headers.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use unimock::{MockFn, Unimock, matching};

    use super::*;
    use crate::traits::NetMock;

    fn url() -> Url {
        Url::parse("http://test.local/seg.ts").unwrap()
    }

    fn fast(max_retries: u32) -> DefaultRetryPolicy {
        DefaultRetryPolicy::new(RetryPolicy::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(5),
        ))
    }

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    #[case(9, false)]
    fn default_policy_counts_attempts(#[case] attempt: u32, #[case] expected: bool) {
        let policy = DefaultRetryPolicy::new(RetryPolicy::default());
        assert_eq!(policy.should_retry(&NetError::Timeout, attempt), expected);
    }

    #[test]
    fn default_policy_skips_client_errors() {
        let policy = DefaultRetryPolicy::new(RetryPolicy::default());
        let error = NetError::http_error(404, url(), None);
        assert!(!policy.should_retry(&error, 0));
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mock = Unimock::new((
            NetMock::get_bytes
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
            NetMock::get_bytes
                .next_call(matching!(_, _))
                .returns(Err(NetError::http_error(503, url(), None))),
            NetMock::get_bytes
                .next_call(matching!(_, _))
                .returns(Ok(Bytes::from_static(b"#EXTM3U"))),
        ));
        let net = RetryNet::new(mock, fast(3));
        assert_eq!(net.get_bytes(url(), None).await.unwrap(), "#EXTM3U");
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let mock = Unimock::new(
            NetMock::get_bytes
                .each_call(matching!(_, _))
                .returns(Err(NetError::Timeout))
                .n_times(3),
        );
        let net = RetryNet::new(mock, fast(2));
        match net.get_bytes(url(), None).await {
            Err(NetError::RetryExhausted {
                max_retries,
                source,
            }) => {
                assert_eq!(max_retries, 2);
                assert!(source.is_timeout());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn non_retryable_error_returns_at_once() {
        let mock = Unimock::new(
            NetMock::get_bytes
                .some_call(matching!(_, _))
                .returns(Err(NetError::http_error(404, url(), None)))
                .once(),
        );
        let net = RetryNet::new(mock, fast(3));
        let error = net.get_bytes(url(), None).await.unwrap_err();
        assert_eq!(error.status_code(), Some(404));
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn stream_request_phase_is_retried() {
        let mock = Unimock::new((
            NetMock::stream
                .next_call(matching!(_, _))
                .answers(&|_, _, _| Err(NetError::Connect("refused".into()))),
            NetMock::stream
                .next_call(matching!(_, _))
                .answers(&|_, _, _| Ok(Box::pin(futures::stream::empty()) as ByteStream)),
        ));
        let net = RetryNet::new(mock, fast(1));
        assert!(net.stream(url(), None).await.is_ok());
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[tokio::test]
    async fn custom_policy_is_consulted() {
        let policy = Unimock::new((
            RetryPolicyMock::should_retry
                .next_call(matching!(_, 0))
                .returns(true),
            RetryPolicyMock::delay_for_attempt
                .next_call(matching!(1))
                .returns(Duration::ZERO),
            RetryPolicyMock::should_retry
                .next_call(matching!(_, 1))
                .returns(false),
        ));
        let net_mock = Unimock::new(
            NetMock::get_bytes
                .each_call(matching!(_, _))
                .returns(Err(NetError::Timeout))
                .n_times(2),
        );
        let net = RetryNet::new(net_mock, policy);
        assert!(matches!(
            net.get_bytes(url(), None).await,
            Err(NetError::RetryExhausted { max_retries: 1, .. })
        ));
    }
}
