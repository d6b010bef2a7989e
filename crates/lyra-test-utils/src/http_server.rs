//! Local HTTP server for integration tests.

use axum::Router;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use url::Url;

/// Serves an axum router on an ephemeral localhost port until dropped.
pub struct TestHttpServer {
    base_url: Url,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TestHttpServer {
    /// Bind `127.0.0.1:0` and start serving `router`.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn new(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, stop) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = stop.await;
                })
                .await;
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}/")).unwrap(),
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Absolute URL for `path` on this server.
    ///
    /// # Panics
    ///
    /// Panics if `path` cannot be joined onto the base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path.trim_start_matches('/')).unwrap()
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
