//! Test support: a scripted network backend and worker builders.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};

use stillpoint_common::{try_init_logging, LogConfig};
use stillpoint_net::{NetError, NetworkBackend, Request, Response, ResponseKind};

use crate::{OfflineWorker, WorkerConfig};

/// Scripted backend: maps URL paths to responses, counts requests, and can
/// be flipped offline mid-test.
pub(crate) struct FakeBackend {
    routes: HashMap<String, (u16, &'static str)>,
    kinds: HashMap<String, ResponseKind>,
    offline: AtomicBool,
    requests: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn with_routes(routes: Vec<(&'static str, u16, &'static str)>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|(path, status, body)| (path.to_string(), (status, body)))
                .collect(),
            kinds: HashMap::new(),
            offline: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        }
    }

    /// Override the classification a path responds with.
    pub(crate) fn kind_for(mut self, path: &str, kind: ResponseKind) -> Self {
        self.kinds.insert(path.to_string(), kind);
        self
    }

    /// Fail every request from now on.
    pub(crate) fn go_offline(&self) {
        self.offline.store(true, Ordering::Relaxed);
    }

    /// Requests that reached this backend, including failed ones.
    pub(crate) fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NetworkBackend for FakeBackend {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if self.offline.load(Ordering::Relaxed) {
            return Err(NetError::RequestFailed("network is offline".to_string()));
        }

        let path = request.url.path().to_string();
        let (status, body) = self
            .routes
            .get(&path)
            .ok_or_else(|| NetError::RequestFailed(format!("no route for {path}")))?;

        Ok(Response {
            request_id: request.id,
            url: request.url,
            status: StatusCode::from_u16(*status).unwrap(),
            headers: HeaderMap::new(),
            kind: self.kinds.get(&path).copied().unwrap_or(ResponseKind::Basic),
            body: Bytes::from_static(body.as_bytes()),
            from_cache: false,
        })
    }
}

/// Routes covering everything [`test_config`]'s manifest precaches.
pub(crate) fn precache_routes() -> Vec<(&'static str, u16, &'static str)> {
    vec![
        ("/", 200, "<!doctype html><title>Stillpoint</title>"),
        ("/index.html", 200, "<!doctype html><main>offline shell</main>"),
        ("/styles.css", 200, "body{margin:0}"),
        ("/app.js", 200, "console.log('breathe')"),
    ]
}

/// A backend with no routes that fails every request.
pub(crate) fn offline_backend() -> Arc<dyn NetworkBackend> {
    let backend = FakeBackend::with_routes(Vec::new());
    backend.go_offline();
    Arc::new(backend)
}

pub(crate) fn test_config() -> WorkerConfig {
    WorkerConfig {
        cache_version: "stillpoint-test-v1".to_string(),
        precache_manifest: vec![
            "./".to_string(),
            "./index.html".to_string(),
            "./styles.css".to_string(),
            "./app.js".to_string(),
        ],
        ..WorkerConfig::default()
    }
}

/// A worker that has installed and activated against the given backend.
pub(crate) async fn activated_worker(backend: Arc<FakeBackend>) -> OfflineWorker {
    try_init_logging(LogConfig::default().with_filter("stillpoint=debug"));

    let worker = OfflineWorker::new(test_config(), backend);
    worker.install().await.expect("test install");
    worker.activate().await.expect("test activate");
    worker
}
