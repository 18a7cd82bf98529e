//! # Stillpoint Net
//!
//! HTTP request/response model and network backend for the Stillpoint
//! offline worker.
//!
//! ## Design Goals
//!
//! 1. **Async HTTP**: Non-blocking network requests
//! 2. **Response classification**: basic/cors/opaque gating for cacheability
//! 3. **Backend seam**: `NetworkBackend` trait so the worker is testable
//!    without a live network

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether two URLs share an origin (scheme, host, port).
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host() == b.host()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a request with an explicit method.
    pub fn with_method(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the Accept header.
    pub fn accept(self, value: &'static str) -> Self {
        self.header(header::ACCEPT, HeaderValue::from_static(value))
    }

    /// Whether this request asks for an HTML document.
    ///
    /// A missing Accept header counts as "not HTML".
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|accept| accept.contains("text/html"))
            .unwrap_or(false)
    }

    /// Whether this request targets the given origin.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        same_origin(&self.url, origin)
    }
}

/// Response classification, mirroring the cacheability gates of the
/// platform this worker stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Same-origin, non-redirected. The only kind eligible for caching.
    Basic,
    /// Cross-origin response.
    Cors,
    /// Cross-origin response with no readable body.
    Opaque,
    /// Response that went through a redirect hop.
    OpaqueRedirect,
    /// Synthesized failure response.
    Error,
}

impl ResponseKind {
    pub fn is_basic(&self) -> bool {
        matches!(self, ResponseKind::Basic)
    }
}

impl std::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseKind::Basic => write!(f, "basic"),
            ResponseKind::Cors => write!(f, "cors"),
            ResponseKind::Opaque => write!(f, "opaque"),
            ResponseKind::OpaqueRedirect => write!(f, "opaqueredirect"),
            ResponseKind::Error => write!(f, "error"),
        }
    }
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: RequestId,
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub kind: ResponseKind,
    pub body: Bytes,
    /// Whether this response was served from a cache store.
    pub from_cache: bool,
}

impl Response {
    /// Check if the request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Whether this response may be written to a cache store:
    /// exactly HTTP 200 with basic classification.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && self.kind.is_basic()
    }

    /// Parse the Content-Type header.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Network backend configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Transport timeout applied to every request.
    pub default_timeout: Duration,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("StillpointWorker/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Seam between the worker and the network.
///
/// The worker only ever talks to the network through this trait, so tests
/// can substitute a scripted in-memory backend.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    /// Issue a request, returning the classified response.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// Real network backend backed by a reqwest client.
pub struct HttpBackend {
    client: Client,
    config: LoaderConfig,
}

impl HttpBackend {
    /// Create a new backend.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

/// Classify a response by comparing the requested and final URLs.
fn classify(requested: &Url, served: &Url) -> ResponseKind {
    if !same_origin(requested, served) {
        ResponseKind::Cors
    } else if requested != served {
        ResponseKind::OpaqueRedirect
    } else {
        ResponseKind::Basic
    }
}

#[async_trait]
impl NetworkBackend for HttpBackend {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = request.body.clone() {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let kind = classify(&request.url, &url);

        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            kind = %kind,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            request_id: request.id,
            url,
            status,
            headers,
            kind,
            body,
            from_cache: false,
        })
    }
}
