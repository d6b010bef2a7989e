use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use futures::StreamExt;
use lyra_net::{Headers, HttpClient, Net, NetError, NetExt, NetOptions, RetryPolicy};
use lyra_test_utils::TestHttpServer;
use rstest::*;

async fn playlist() -> &'static str {
    "#EXTM3U\n#EXT-X-ENDLIST\n"
}

/// Echoes the cache headers it saw.
async fn cache_probe(headers: HeaderMap) -> impl IntoResponse {
    let seen = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    format!(
        "{}|{}|{}",
        seen(header::CACHE_CONTROL),
        seen(header::PRAGMA),
        seen(header::HeaderName::from_static("x-key-token"))
    )
}

async fn chunked() -> impl IntoResponse {
    let parts = (0u8..8).map(|i| Ok::<_, axum::BoxError>(Bytes::from(vec![i; 188])));
    axum::body::Body::from_stream(futures::stream::iter(parts))
}

async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    match hits.fetch_add(1, Ordering::SeqCst) {
        0 | 1 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        _ => "recovered".into_response(),
    }
}

async fn stalled() -> &'static str {
    tokio::time::sleep(Duration::from_secs(2)).await;
    "late"
}

#[fixture]
fn hits() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[fixture]
async fn server(hits: Arc<AtomicUsize>) -> TestHttpServer {
    let router = Router::new()
        .route("/index.m3u8", get(playlist))
        .route("/cache", get(cache_probe))
        .route("/seg.ts", get(chunked))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/stalled", get(stalled))
        .route("/flaky", get(flaky))
        .with_state(hits);
    TestHttpServer::new(router).await
}

fn client(options: NetOptions) -> HttpClient {
    HttpClient::new(options).unwrap()
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn get_bytes_reads_whole_body(#[future] server: TestHttpServer) {
    let server = server.await;
    let body = client(NetOptions::default())
        .get_bytes(server.url("/index.m3u8"), None)
        .await
        .unwrap();
    assert_eq!(body, "#EXTM3U\n#EXT-X-ENDLIST\n");
}

#[rstest]
#[case::bypass(true, "no-cache|no-cache|abc")]
#[case::plain(false, "-|-|abc")]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn cache_bypass_headers(
    #[future] server: TestHttpServer,
    #[case] bypass: bool,
    #[case] expected: &str,
) {
    let server = server.await;
    let extra: Headers = [("X-Key-Token", "abc")].into_iter().collect();
    let body = client(NetOptions::default().with_bypass_cache(bypass))
        .get_bytes(server.url("/cache"), Some(extra))
        .await
        .unwrap();
    assert_eq!(body, expected);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn stream_yields_every_byte(#[future] server: TestHttpServer) {
    let server = server.await;
    let mut stream = client(NetOptions::default())
        .stream(server.url("/seg.ts"), None)
        .await
        .unwrap();
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected.len(), 8 * 188);
    assert_eq!(collected[188 * 7], 7);
}

#[rstest]
#[case("/missing", 404, false)]
#[case("/broken", 500, true)]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn error_statuses(
    #[future] server: TestHttpServer,
    #[case] path: &str,
    #[case] status: u16,
    #[case] retryable: bool,
) {
    let server = server.await;
    let error = client(NetOptions::default())
        .get_bytes(server.url(path), None)
        .await
        .unwrap_err();
    assert!(matches!(error, NetError::HttpError { .. }));
    assert_eq!(error.status_code(), Some(status));
    assert_eq!(error.is_retryable(), retryable);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn retry_layer_rides_out_503(#[future] server: TestHttpServer) {
    let server = server.await;
    let net = client(NetOptions::default()).with_retry(RetryPolicy::new(
        3,
        Duration::from_millis(5),
        Duration::from_millis(20),
    ));
    let body = net.get_bytes(server.url("/flaky"), None).await.unwrap();
    assert_eq!(body, "recovered");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn timeout_layer_bounds_request(#[future] server: TestHttpServer) {
    let server = server.await;
    let net = client(NetOptions::default()).with_timeout(Duration::from_millis(100));
    let error = net.get_bytes(server.url("/stalled"), None).await.unwrap_err();
    assert!(error.is_timeout());
}
