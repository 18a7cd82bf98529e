//! Push handling and the notification tray.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::OfflineWorker;

/// Optional push payload: `{"title": …, "body": …}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Action identifier consumed by the click handler.
    pub action: String,
    /// Button label.
    pub title: String,
}

impl NotificationAction {
    pub fn new(action: &str, title: &str) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
        }
    }
}

/// A displayed (or about-to-be-displayed) notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Notifications with the same tag replace each other.
    pub tag: String,
    pub actions: Vec<NotificationAction>,
    /// URL a plain (non-action) click targets.
    pub url: String,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
}

/// The visible notifications, keyed by tag so duplicates coalesce.
#[derive(Debug, Default)]
pub struct NotificationTray {
    shown: HashMap<String, Notification>,
}

impl NotificationTray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification, returning `true` when it replaced an
    /// existing one with the same tag.
    pub fn show(&mut self, notification: Notification) -> bool {
        self.shown
            .insert(notification.tag.clone(), notification)
            .is_some()
    }

    /// Close a notification by tag.
    pub fn close(&mut self, tag: &str) -> Option<Notification> {
        self.shown.remove(tag)
    }

    /// Get a notification by tag.
    pub fn get(&self, tag: &str) -> Option<&Notification> {
        self.shown.get(tag)
    }

    /// All visible notifications, unordered.
    pub fn active(&self) -> Vec<&Notification> {
        self.shown.values().collect()
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

impl OfflineWorker {
    /// Handle a push message.
    ///
    /// The payload is optional JSON; a malformed payload is logged and the
    /// defaults are used. Nothing here can suppress the notification.
    pub async fn handle_push(&self, payload: Option<&[u8]>) {
        let parsed = match payload {
            None => PushPayload::default(),
            Some(bytes) => match serde_json::from_slice::<PushPayload>(bytes) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "Unparsable push payload, using defaults");
                    PushPayload::default()
                }
            },
        };

        let defaults = &self.config.notifications;
        let notification = self.notification(
            parsed.title.unwrap_or_else(|| defaults.title.clone()),
            parsed.body.unwrap_or_else(|| defaults.body.clone()),
            vec![
                NotificationAction::new("start", "Start session"),
                NotificationAction::new("dismiss", "Dismiss"),
            ],
        );

        let replaced = self.tray.write().await.show(notification);
        if replaced {
            debug!(tag = %defaults.tag, "Coalesced with an existing notification");
        }
        info!(tag = %defaults.tag, "Notification shown");
    }

    /// The daily-reminder notification.
    pub(crate) fn reminder_notification(&self) -> Notification {
        let defaults = &self.config.notifications;
        self.notification(
            defaults.title.clone(),
            defaults.body.clone(),
            vec![
                NotificationAction::new("start", "Start session"),
                NotificationAction::new("later", "Later"),
            ],
        )
    }

    fn notification(
        &self,
        title: String,
        body: String,
        actions: Vec<NotificationAction>,
    ) -> Notification {
        let defaults = &self.config.notifications;
        Notification {
            title,
            body,
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            tag: defaults.tag.clone(),
            actions,
            url: "./".to_string(),
            vibrate: defaults.vibrate.clone(),
        }
    }
}
