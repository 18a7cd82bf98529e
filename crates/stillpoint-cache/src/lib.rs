//! # Stillpoint Cache
//!
//! Named, versioned cache stores for the Stillpoint offline worker.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     └── Cache ("stillpoint-v0.1.0", ...)
//!             └── CacheKey (method + URL) → CachedResponse
//! ```
//!
//! A cache generation is named after the deployed version; activation keeps
//! exactly one generation alive via [`CacheStorage::prune_except`]. Install
//! populates a generation atomically from the asset manifest via
//! [`precache`].

use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use stillpoint_net::{NetworkBackend, Request, Response, ResponseKind};

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Precache failed for {url}: {reason}")]
    PrecacheFailed { url: String, reason: String },

    #[error("Corrupt cache entry for {0}")]
    CorruptEntry(String),

    #[error("Network error: {0}")]
    Network(#[from] stillpoint_net::NetError),
}

/// Request identity used as the cache key: method + absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
        }
    }

    /// Derive the key for a request.
    pub fn for_request(request: &Request) -> Self {
        Self::new(request.method.as_str(), request.url.as_str())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Response URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Stored-at timestamp (ms since epoch).
    pub stored_at: u64,
}

impl CachedResponse {
    /// Snapshot a network response for storage.
    pub fn from_response(response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: response.url.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            stored_at: now_ms(),
        }
    }

    /// Rehydrate a response for serving.
    ///
    /// Fails only when the stored entry no longer parses; callers treat that
    /// as a cache miss.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.url).map_err(|_| CacheError::CorruptEntry(self.url.clone()))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| CacheError::CorruptEntry(self.url.clone()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Ok(Response {
            request_id: stillpoint_net::RequestId::new(),
            url,
            status,
            headers,
            kind: ResponseKind::Basic,
            body: self.body.clone().into(),
            from_cache: true,
        })
    }
}

/// A single cache generation.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Stored entries.
    entries: HashMap<CacheKey, CachedResponse>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Look up a response by exact key match.
    pub fn match_key(&self, key: &CacheKey) -> Option<&CachedResponse> {
        self.entries.get(key)
    }

    /// Store a response under a key.
    pub fn put(&mut self, key: CacheKey, entry: CachedResponse) {
        self.entries.insert(key, entry);
    }

    /// Delete an entry.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&CacheKey> {
        self.entries.keys().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Cache storage: the set of named cache generations.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates it if missing).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if a cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.keys().map(|s| s.as_str()).collect()
    }

    /// Delete every cache except the named one, returning the deleted names.
    ///
    /// Deletions are irreversible and unconditional on name mismatch.
    pub fn prune_except(&mut self, keep: &str) -> Vec<String> {
        let stale: Vec<String> = self
            .caches
            .keys()
            .filter(|name| name.as_str() != keep)
            .cloned()
            .collect();

        for name in &stale {
            self.caches.remove(name);
            debug!(cache = %name, "Deleted stale cache generation");
        }

        stale
    }
}

/// Atomically populate a cache generation from an asset manifest.
///
/// Every manifest entry is resolved against `origin` and fetched; all fetches
/// must return a 2xx response before anything is written. On any failure the
/// storage is left untouched: there is no partial cache.
pub async fn precache(
    storage: &RwLock<CacheStorage>,
    backend: &dyn NetworkBackend,
    cache_name: &str,
    origin: &Url,
    manifest: &[String],
) -> Result<usize, CacheError> {
    let mut staged = Vec::with_capacity(manifest.len());

    for entry in manifest {
        let url = origin
            .join(entry)
            .map_err(|e| CacheError::PrecacheFailed {
                url: entry.clone(),
                reason: e.to_string(),
            })?;

        let request = Request::get(url.clone());
        let key = CacheKey::for_request(&request);

        let response = match backend.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Precache fetch failed");
                return Err(CacheError::PrecacheFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if !response.ok() {
            warn!(url = %url, status = %response.status, "Precache entry not OK");
            return Err(CacheError::PrecacheFailed {
                url: url.to_string(),
                reason: format!("status {}", response.status),
            });
        }

        staged.push((key, CachedResponse::from_response(&response)));
    }

    let count = staged.len();
    let mut storage = storage.write().await;
    let cache = storage.open(cache_name);
    for (key, entry) in staged {
        cache.put(key, entry);
    }

    debug!(cache = %cache_name, count, "Precache complete");
    Ok(count)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
