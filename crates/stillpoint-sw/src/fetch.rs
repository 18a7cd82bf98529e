//! Fetch interception: cache-first with network fill and offline fallback.

use http::{header, HeaderMap, HeaderValue, StatusCode};
use tracing::{trace, warn};

use stillpoint_cache::{CacheKey, CachedResponse};
use stillpoint_net::{Request, Response, ResponseKind};

use crate::OfflineWorker;

/// Result of running a request through the interceptor.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the platform handles the request natively.
    Passthrough,
    /// Intercepted; this response goes back to the caller.
    Response(Response),
}

impl FetchOutcome {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }

    /// Unwrap the response, if any.
    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Response(response) => Some(response),
        }
    }
}

impl OfflineWorker {
    /// Intercept a request.
    ///
    /// Only same-origin GETs are handled: cache hits short-circuit without
    /// touching the network, misses are filled from the network (cacheable
    /// responses are stored for next time), and network failure degrades to
    /// the offline fallback. This never fails; every internal error lands on
    /// a fallback path.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if request.method != http::Method::GET || !request.is_same_origin(&self.config.origin) {
            trace!(method = %request.method, url = %request.url, "Passthrough");
            return FetchOutcome::Passthrough;
        }

        let key = CacheKey::for_request(request);
        if let Some(response) = self.cache_lookup(&key).await {
            return FetchOutcome::Response(response);
        }

        match self.backend().fetch(request.clone()).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.cache_fill(key, &response).await;
                }
                FetchOutcome::Response(response)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network fetch failed, falling back");
                FetchOutcome::Response(self.offline_fallback(request).await)
            }
        }
    }

    /// Exact-key lookup in the current cache generation.
    ///
    /// A corrupt entry is logged and treated as a miss.
    async fn cache_lookup(&self, key: &CacheKey) -> Option<Response> {
        let storage = self.caches.read().await;
        let entry = storage.get(&self.config.cache_version)?.match_key(key)?;

        match entry.to_response() {
            Ok(response) => {
                trace!(key = %key, "Cache hit");
                Some(response)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable cache entry, treating as miss");
                None
            }
        }
    }

    /// Store a duplicate of a freshly fetched response.
    async fn cache_fill(&self, key: CacheKey, response: &Response) {
        let entry = CachedResponse::from_response(response);
        let mut storage = self.caches.write().await;
        storage.open(&self.config.cache_version).put(key, entry);
        trace!(version = %self.config.cache_version, "Cache fill");
    }

    /// Offline fallback: the cached root document for HTML requests, the
    /// fixed 503 for everything else (including HTML when the root document
    /// was never cached).
    async fn offline_fallback(&self, request: &Request) -> Response {
        if request.accepts_html() {
            if let Ok(url) = self.config.origin.join(&self.config.root_document) {
                let key = CacheKey::new("GET", url.as_str());
                if let Some(response) = self.cache_lookup(&key).await {
                    return response;
                }
            }
            warn!(url = %request.url, "Root document not cached, serving offline notice");
        }

        self.offline_response(request)
    }

    /// The fixed plain-text offline response.
    fn offline_response(&self, request: &Request) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        Response {
            request_id: request.id,
            url: request.url.clone(),
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers,
            kind: ResponseKind::Error,
            body: self.config.offline_body.clone().into(),
            from_cache: false,
        }
    }
}
