//! Background and periodic sync handlers.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::{OfflineWorker, SwError};

/// Tag of the one-shot background sync event.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Tag of the daily reminder periodic sync event.
pub const DAILY_REMINDER_TAG: &str = "daily-reminder";

/// State-store key of the last completed session, in ms since epoch.
pub(crate) const LAST_SESSION_KEY: &str = "last_session_completed_at";

impl OfflineWorker {
    /// Handle a one-shot sync event.
    ///
    /// Synchronization is a stub: it inspects the current cache and reports
    /// success. TODO: reconcile journal entries with the backend once the
    /// sync endpoint ships.
    pub async fn handle_sync(&self, tag: &str) -> Result<(), SwError> {
        if tag != BACKGROUND_SYNC_TAG {
            debug!(tag, "Ignoring sync event with unknown tag");
            return Ok(());
        }

        let storage = self.caches.read().await;
        let cached_entries = storage
            .get(&self.config.cache_version)
            .map(|cache| cache.len())
            .unwrap_or(0);

        info!(cached_entries, "Background sync complete");
        Ok(())
    }

    /// Handle a periodic sync event.
    ///
    /// For the daily reminder: show a notification when no session was
    /// completed within the reminder interval.
    pub async fn handle_periodic_sync(&self, tag: &str) -> Result<(), SwError> {
        if tag != DAILY_REMINDER_TAG {
            debug!(tag, "Ignoring periodic sync event with unknown tag");
            return Ok(());
        }

        let last: Option<u64> = match self.store.get_as(LAST_SESSION_KEY).await {
            Ok(last) => last,
            Err(e) => {
                // An unreadable record must not silence the reminder.
                warn!(error = %e, "Unreadable session timestamp, treating as absent");
                None
            }
        };

        let interval_ms = self.config.reminder_interval.as_millis() as u64;
        let due = match last {
            None => true,
            Some(ts) => now_ms().saturating_sub(ts) >= interval_ms,
        };

        if due {
            let notification = self.reminder_notification();
            self.tray.write().await.show(notification);
            info!("Daily reminder shown");
        } else {
            debug!("Session recent enough, no reminder");
        }
        Ok(())
    }

    /// Record that a session just completed.
    ///
    /// The host page reports this through the worker so the reminder check
    /// reads from one well-defined store.
    pub async fn record_session_completed(&self) -> Result<(), SwError> {
        self.store.put(LAST_SESSION_KEY, now_ms()).await?;
        debug!("Session completion recorded");
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
