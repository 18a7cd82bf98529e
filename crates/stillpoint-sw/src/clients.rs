//! Window clients: the open pages this worker controls.

use hashbrown::HashMap;
use tracing::{debug, info};
use url::Url;

use stillpoint_net::same_origin;

use crate::OfflineWorker;

/// An open page.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Whether the page is frontmost.
    pub focused: bool,

    /// Whether this worker controls the page.
    pub controlled: bool,
}

/// Registry of open window clients.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
    next_id: u64,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page the user opened (uncontrolled until claimed).
    pub fn add(&mut self, url: Url) -> String {
        self.insert(url, false, false)
    }

    /// Open a new window, focused and controlled.
    pub fn open_window(&mut self, url: Url) -> String {
        let id = self.insert(url, true, true);
        info!(client = %id, "Opened window");
        id
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// All clients, unordered.
    pub fn all(&self) -> Vec<&Client> {
        self.clients.values().collect()
    }

    /// Take control of every client, returning how many were claimed.
    pub fn claim(&mut self) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// Find a client on the given origin.
    pub fn find_same_origin(&self, origin: &Url) -> Option<&Client> {
        self.clients
            .values()
            .find(|c| same_origin(&c.url, origin))
    }

    /// Bring a client to the front.
    pub fn focus(&mut self, id: &str) -> bool {
        // Only one client is frontmost at a time.
        let known = self.clients.contains_key(id);
        if known {
            for client in self.clients.values_mut() {
                client.focused = client.id == id;
            }
        }
        known
    }

    /// Remove a client (page closed).
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn insert(&mut self, url: Url, focused: bool, controlled: bool) -> String {
        self.next_id += 1;
        let id = format!("client-{}", self.next_id);
        self.clients.insert(
            id.clone(),
            Client {
                id: id.clone(),
                url,
                focused,
                controlled,
            },
        );
        id
    }
}

/// What a notification click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing page was brought to the front.
    Focused(String),
    /// A new window was opened.
    Opened(String),
}

impl OfflineWorker {
    /// Handle a notification click: close the notification, then focus an
    /// existing same-origin page rather than opening a duplicate. Only when
    /// none exists, open a new window, at `./?action=start` when the
    /// clicked action was `start` and at `./` otherwise.
    pub async fn handle_notification_click(
        &self,
        tag: &str,
        action: Option<&str>,
    ) -> ClickOutcome {
        if self.tray.write().await.close(tag).is_none() {
            debug!(tag, "Click on unknown notification");
        }

        let target = if action == Some("start") {
            "./?action=start"
        } else {
            "./"
        };
        let url = self
            .config
            .origin
            .join(target)
            .unwrap_or_else(|_| self.config.origin.clone());

        let mut clients = self.clients.write().await;
        if let Some(id) = clients
            .find_same_origin(&self.config.origin)
            .map(|c| c.id.clone())
        {
            clients.focus(&id);
            debug!(client = %id, "Focused existing client");
            ClickOutcome::Focused(id)
        } else {
            ClickOutcome::Opened(clients.open_window(url))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{activated_worker, precache_routes, FakeBackend};
    use std::sync::Arc;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_add_and_claim() {
        let mut clients = Clients::new();
        clients.add(url("https://stillpoint.app/"));
        clients.add(url("https://stillpoint.app/settings"));

        assert_eq!(clients.claim(), 2);
        // Claim is idempotent.
        assert_eq!(clients.claim(), 0);
        assert!(clients.all().iter().all(|c| c.controlled));
    }

    #[test]
    fn test_focus_is_exclusive() {
        let mut clients = Clients::new();
        let a = clients.add(url("https://stillpoint.app/"));
        let b = clients.add(url("https://stillpoint.app/journal"));

        assert!(clients.focus(&a));
        assert!(clients.focus(&b));

        assert!(!clients.get(&a).unwrap().focused);
        assert!(clients.get(&b).unwrap().focused);

        assert!(!clients.focus("client-999"));
    }

    #[test]
    fn test_find_same_origin() {
        let mut clients = Clients::new();
        clients.add(url("https://elsewhere.example.com/"));

        let origin = url("https://stillpoint.app/");
        assert!(clients.find_same_origin(&origin).is_none());

        clients.add(url("https://stillpoint.app/journal"));
        assert!(clients.find_same_origin(&origin).is_some());
    }

    #[tokio::test]
    async fn test_click_focuses_existing_client() {
        let backend = Arc::new(FakeBackend::with_routes(precache_routes()));
        let worker = activated_worker(backend).await;

        let existing = {
            let clients = worker.clients();
            let mut clients = clients.write().await;
            clients.add(worker.config().origin.join("./journal").unwrap())
        };

        let tag = worker.config().notifications.tag.clone();
        let outcome = worker.handle_notification_click(&tag, Some("start")).await;

        assert_eq!(outcome, ClickOutcome::Focused(existing.clone()));
        let clients = worker.clients();
        let clients = clients.read().await;
        assert!(clients.get(&existing).unwrap().focused);
        assert_eq!(clients.len(), 1);
    }

    #[tokio::test]
    async fn test_click_start_opens_window_with_action_query() {
        let backend = Arc::new(FakeBackend::with_routes(precache_routes()));
        let worker = activated_worker(backend).await;

        let tag = worker.config().notifications.tag.clone();
        let outcome = worker.handle_notification_click(&tag, Some("start")).await;

        let id = match outcome {
            ClickOutcome::Opened(id) => id,
            other => panic!("expected a new window, got {other:?}"),
        };

        let clients = worker.clients();
        let clients = clients.read().await;
        let client = clients.get(&id).unwrap();
        assert_eq!(client.url.query(), Some("action=start"));
        assert!(client.focused);
    }

    #[tokio::test]
    async fn test_click_dismiss_opens_plain_root() {
        let backend = Arc::new(FakeBackend::with_routes(precache_routes()));
        let worker = activated_worker(backend).await;

        let tag = worker.config().notifications.tag.clone();
        let outcome = worker.handle_notification_click(&tag, Some("dismiss")).await;

        let id = match outcome {
            ClickOutcome::Opened(id) => id,
            other => panic!("expected a new window, got {other:?}"),
        };

        let clients = worker.clients();
        let clients = clients.read().await;
        assert_eq!(clients.get(&id).unwrap().url.query(), None);
    }

    #[tokio::test]
    async fn test_click_closes_the_notification() {
        let backend = Arc::new(FakeBackend::with_routes(precache_routes()));
        let worker = activated_worker(backend).await;

        worker.handle_push(None).await;
        let tag = worker.config().notifications.tag.clone();
        assert_eq!(worker.tray().read().await.len(), 1);

        worker.handle_notification_click(&tag, None).await;
        assert!(worker.tray().read().await.is_empty());
    }
}
