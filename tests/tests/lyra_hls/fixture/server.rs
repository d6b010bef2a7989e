use std::{collections::HashMap, sync::Arc};

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use lyra_test_utils::TestHttpServer;
use parking_lot::Mutex;
use url::Url;

/// One request as the server saw it.
#[derive(Clone, Debug)]
pub(crate) struct Hit {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

/// Mutable file table behind the server. Clones share state, so a test
/// can publish new playlist revisions while the session is running.
#[derive(Clone, Default)]
pub(crate) struct Content {
    files: Arc<Mutex<HashMap<String, Bytes>>>,
    statuses: Arc<Mutex<HashMap<String, StatusCode>>>,
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl Content {
    pub(crate) fn put(&self, path: &str, body: impl Into<Bytes>) -> &Self {
        self.files.lock().insert(path.to_string(), body.into());
        self
    }

    /// Answer every request for `path` with `status`.
    pub(crate) fn fail(&self, path: &str, status: StatusCode) -> &Self {
        self.statuses.lock().insert(path.to_string(), status);
        self
    }

    pub(crate) fn hits(&self, path: &str) -> Vec<Hit> {
        self.hits
            .lock()
            .iter()
            .filter(|hit| hit.path == path)
            .cloned()
            .collect()
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.hits.lock().iter().filter(|hit| hit.path == path).count()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.hits.lock().iter().map(|hit| hit.path.clone()).collect()
    }
}

async fn serve(State(content): State<Content>, uri: Uri, headers: HeaderMap) -> Response {
    let path = uri.path().to_string();
    content.hits.lock().push(Hit {
        path: path.clone(),
        query: uri.query().map(str::to_string),
        headers,
    });

    if let Some(status) = content.statuses.lock().get(&path).copied() {
        return status.into_response();
    }
    let body = content.files.lock().get(&path).cloned();
    match body {
        Some(body) => body.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// HLS origin on a local port.
pub(crate) struct HlsServer {
    content: Content,
    server: TestHttpServer,
}

impl HlsServer {
    pub(crate) async fn new(content: Content) -> Self {
        let router = Router::new().fallback(serve).with_state(content.clone());
        Self {
            content,
            server: TestHttpServer::new(router).await,
        }
    }

    pub(crate) fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }

    pub(crate) fn content(&self) -> &Content {
        &self.content
    }
}
