use thiserror::Error;
use url::Url;

#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("Timeout")]
    Timeout,

    #[error("Request failed after {max_retries} retries: {source}")]
    RetryExhausted {
        max_retries: u32,
        source: Box<NetError>,
    },

    #[error("HTTP {status} for URL: {url}")]
    HttpError {
        url: Url,
        status: u16,
        body: Option<String>,
    },

    #[error("client setup failed: {0}")]
    Setup(String),
}

impl NetError {
    pub fn http_error(status: u16, url: Url, body: Option<String>) -> Self {
        Self::HttpError { url, status, body }
    }

    pub fn timeout() -> Self {
        Self::Timeout
    }

    pub fn http<S: Into<String>>(msg: S) -> Self {
        Self::Http(msg.into())
    }

    /// Transport hiccups and server-side statuses are worth another attempt;
    /// client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Http(_) | NetError::Connect(_) | NetError::Timeout => true,
            NetError::HttpError { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            NetError::RetryExhausted { .. } | NetError::Setup(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::Timeout)
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            NetError::HttpError { status, .. } => Some(*status),
            NetError::RetryExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else {
            Self::Http(error.to_string())
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn url() -> Url {
        Url::parse("http://example.com/seg.ts").unwrap()
    }

    #[rstest]
    #[case::timeout(NetError::Timeout, true)]
    #[case::connect(NetError::Connect("refused".into()), true)]
    #[case::body(NetError::http("error decoding response body"), true)]
    #[case::status_500(NetError::http_error(500, url(), None), true)]
    #[case::status_503(NetError::http_error(503, url(), None), true)]
    #[case::status_429(NetError::http_error(429, url(), None), true)]
    #[case::status_408(NetError::http_error(408, url(), None), true)]
    #[case::status_404(NetError::http_error(404, url(), None), false)]
    #[case::status_403(NetError::http_error(403, url(), None), false)]
    #[case::setup(NetError::Setup("tls".into()), false)]
    #[case::exhausted(NetError::RetryExhausted { max_retries: 3, source: Box::new(NetError::Timeout) }, false)]
    fn retryable_classification(#[case] error: NetError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn status_code_looks_through_exhaustion() {
        let error = NetError::RetryExhausted {
            max_retries: 2,
            source: Box::new(NetError::http_error(502, url(), None)),
        };
        assert_eq!(error.status_code(), Some(502));
        assert_eq!(NetError::Timeout.status_code(), None);
        assert!(NetError::timeout().is_timeout());
    }
}
