//! # Stillpoint Offline Worker
//!
//! Offline worker for the Stillpoint meditation app: a cache-first proxy
//! over same-origin GET traffic, with push notifications, lifecycle
//! messaging, and sync handlers.
//!
//! ## Features
//!
//! - **Lifecycle**: install (atomic precache), activate (stale-cache pruning)
//! - **Fetch interception**: cache-first, network fill, offline fallback
//! - **Push**: JSON payload with logged fallback to defaults
//! - **Notifications**: tag-coalescing tray, click-to-focus routing
//! - **Messaging**: SKIP_WAITING / GET_VERSION control protocol
//! - **Sync**: background-sync stub, daily-reminder periodic check
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     ├── CacheStorage ── Cache ("stillpoint-v…") ── key → response
//!     ├── StateStore  ── "last_session_completed_at"
//!     ├── Clients     ── controlled windows (claim / focus / open)
//!     ├── NotificationTray ── tag → Notification
//!     └── NetworkBackend (trait) ── HttpBackend | test fake
//! ```
//!
//! Exactly one cache generation survives activation; its name is the
//! worker's version identifier and changes with every deployment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error};
use url::Url;

use stillpoint_cache::{CacheError, CacheStorage};
use stillpoint_common::StillpointError;
use stillpoint_net::NetworkBackend;
use stillpoint_store::{StateStore, StoreError};

mod clients;
mod fetch;
mod lifecycle;
mod message;
mod push;
mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use clients::{Client, Clients, ClickOutcome};
pub use fetch::FetchOutcome;
pub use message::{ControlMessage, VersionReply};
pub use push::{Notification, NotificationAction, NotificationTray, PushPayload};
pub use sync::{BACKGROUND_SYNC_TAG, DAILY_REMINDER_TAG};

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid control message: {0}")]
    InvalidMessage(String),

    #[error("Reply channel closed")]
    ReplyChannelClosed,
}

impl From<SwError> for StillpointError {
    fn from(e: SwError) -> Self {
        match e {
            SwError::Lifecycle(msg) => StillpointError::lifecycle(msg),
            SwError::Cache(e) => StillpointError::cache_with_source("cache operation failed", e),
            SwError::Store(e) => StillpointError::store_with_source("store operation failed", e),
            SwError::InvalidMessage(msg) => StillpointError::InvalidArgument(msg),
            SwError::ReplyChannelClosed => {
                StillpointError::InvalidArgument("reply channel closed".to_string())
            }
        }
    }
}

// ==================== Worker state ====================

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Initial state, nothing run yet.
    Parsed,
    /// Install in progress.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activation in progress.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::Parsed
    }
}

// ==================== Configuration ====================

/// Notification defaults used when a push payload is absent or malformed.
#[derive(Debug, Clone)]
pub struct NotificationDefaults {
    /// Default notification title.
    pub title: String,
    /// Default notification body.
    pub body: String,
    /// Icon URL, relative to the origin.
    pub icon: String,
    /// Badge URL, relative to the origin.
    pub badge: String,
    /// Tag under which reminders coalesce.
    pub tag: String,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Stillpoint".to_string(),
            body: "Time for a mindful pause.".to_string(),
            icon: "./icons/icon-192.png".to_string(),
            badge: "./icons/badge-72.png".to_string(),
            tag: "stillpoint-reminder".to_string(),
            vibrate: vec![200, 100, 200],
        }
    }
}

/// Worker configuration.
///
/// The cache version is an explicit deploy-time input, not a constant baked
/// into the code: bumping it is what retires the previous cache generation.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Origin this worker serves. Requests elsewhere pass through untouched.
    pub origin: Url,

    /// Name of the current cache generation.
    pub cache_version: String,

    /// Relative URLs precached at install time. Every entry must fetch with
    /// a 2xx status or install fails as a whole.
    pub precache_manifest: Vec<String>,

    /// Relative URL of the document served to offline HTML navigations.
    pub root_document: String,

    /// Body of the synthesized 503 offline response.
    pub offline_body: String,

    /// Name of the persistent state store.
    pub state_store: String,

    /// Notification defaults.
    pub notifications: NotificationDefaults,

    /// How long after the last completed session the daily reminder fires.
    pub reminder_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("https://stillpoint.app/").expect("static origin URL"),
            cache_version: format!("stillpoint-v{}", env!("CARGO_PKG_VERSION")),
            precache_manifest: vec![
                "./".to_string(),
                "./index.html".to_string(),
                "./styles.css".to_string(),
                "./app.js".to_string(),
                "./manifest.json".to_string(),
                "./icons/icon-192.png".to_string(),
                "./icons/icon-512.png".to_string(),
            ],
            root_document: "./index.html".to_string(),
            offline_body: "Stillpoint is offline. Reconnect to continue your practice."
                .to_string(),
            state_store: "stillpoint-state".to_string(),
            notifications: NotificationDefaults::default(),
            reminder_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

// ==================== Worker ====================

/// Events the host platform delivers to the worker.
///
/// Fetch interception is not an event here: it returns a value and is
/// dispatched directly through [`OfflineWorker::handle_fetch`].
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Sync {
        tag: String,
    },
    PeriodicSync {
        tag: String,
    },
    Push {
        payload: Option<bytes::Bytes>,
    },
    NotificationClick {
        tag: String,
        action: Option<String>,
    },
    Message {
        message: ControlMessage,
        reply: Option<tokio::sync::oneshot::Sender<VersionReply>>,
    },
}

/// The offline worker: one instance per deployed version.
pub struct OfflineWorker {
    config: WorkerConfig,
    state: RwLock<WorkerState>,
    skip_waiting_requested: AtomicBool,
    caches: Arc<RwLock<CacheStorage>>,
    store: Arc<StateStore>,
    clients: Arc<RwLock<Clients>>,
    tray: Arc<RwLock<NotificationTray>>,
    backend: Arc<dyn NetworkBackend>,
}

impl OfflineWorker {
    /// Create a worker with fresh storage.
    pub fn new(config: WorkerConfig, backend: Arc<dyn NetworkBackend>) -> Self {
        let store = Arc::new(StateStore::new(&config.state_store));
        Self::with_storage(
            config,
            backend,
            Arc::new(RwLock::new(CacheStorage::new())),
            store,
        )
    }

    /// Create a worker attached to storage owned by the host platform.
    ///
    /// A new deployment attaches to the same storage as its predecessor so
    /// that activation can retire the old cache generation.
    pub fn with_storage(
        config: WorkerConfig,
        backend: Arc<dyn NetworkBackend>,
        caches: Arc<RwLock<CacheStorage>>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting_requested: AtomicBool::new(false),
            caches,
            store,
            clients: Arc::new(RwLock::new(Clients::new())),
            tray: Arc::new(RwLock::new(NotificationTray::new())),
            backend,
        }
    }

    /// Worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Current cache generation name.
    pub fn version(&self) -> &str {
        &self.config.cache_version
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: WorkerState) {
        let mut slot = self.state.write().await;
        if *slot != state {
            debug!(from = ?*slot, to = ?state, "Worker state change");
            *slot = state;
        }
    }

    /// Whether install requested immediate activation.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting_requested.load(Ordering::Relaxed)
    }

    pub(crate) fn request_skip_waiting(&self) {
        self.skip_waiting_requested.store(true, Ordering::Relaxed);
    }

    /// Shared cache storage.
    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    /// Persistent state store.
    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// Window clients registry.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    /// Notification tray.
    pub fn tray(&self) -> Arc<RwLock<NotificationTray>> {
        Arc::clone(&self.tray)
    }

    pub(crate) fn backend(&self) -> &dyn NetworkBackend {
        self.backend.as_ref()
    }

    /// Run one platform event through its handler.
    ///
    /// This is the error boundary: failures are logged and never propagate,
    /// mirroring the host platform's tolerance for handler faults.
    pub async fn dispatch(&self, event: WorkerEvent) {
        let result = match event {
            WorkerEvent::Install => self.install().await.map(|_| ()),
            WorkerEvent::Activate => self.activate().await,
            WorkerEvent::Sync { tag } => self.handle_sync(&tag).await,
            WorkerEvent::PeriodicSync { tag } => self.handle_periodic_sync(&tag).await,
            WorkerEvent::Push { payload } => {
                self.handle_push(payload.as_deref()).await;
                Ok(())
            }
            WorkerEvent::NotificationClick { tag, action } => {
                self.handle_notification_click(&tag, action.as_deref()).await;
                Ok(())
            }
            WorkerEvent::Message { message, reply } => self.handle_message(message, reply).await,
        };

        if let Err(e) = result {
            let e = StillpointError::from(e);
            error!(category = e.category(), error = %e, "Worker event handler failed");
        }
    }
}
