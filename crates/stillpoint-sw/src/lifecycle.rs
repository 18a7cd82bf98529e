//! Install and activate lifecycle.

use tracing::{info, warn};

use crate::{OfflineWorker, SwError, WorkerState};

impl OfflineWorker {
    /// Install this worker version: atomically precache the asset manifest.
    ///
    /// Any single fetch failure aborts the whole step and leaves storage
    /// untouched, so the previous version (if any) stays in control. On
    /// success the worker requests immediate activation instead of waiting
    /// for old instances to wind down.
    pub async fn install(&self) -> Result<usize, SwError> {
        self.set_state(WorkerState::Installing).await;
        info!(version = %self.config.cache_version, "Installing");

        let result = stillpoint_cache::precache(
            &self.caches,
            self.backend(),
            &self.config.cache_version,
            &self.config.origin,
            &self.config.precache_manifest,
        )
        .await;

        match result {
            Ok(count) => {
                self.set_state(WorkerState::Installed).await;
                self.request_skip_waiting();
                info!(version = %self.config.cache_version, precached = count, "Install complete");
                Ok(count)
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant).await;
                warn!(version = %self.config.cache_version, error = %e, "Install failed");
                Err(e.into())
            }
        }
    }

    /// Activate this worker version.
    ///
    /// Deletes every cache generation other than the current one (no
    /// rollback), then claims all window clients so this version serves
    /// requests without a reload.
    pub async fn activate(&self) -> Result<(), SwError> {
        self.set_state(WorkerState::Activating).await;

        let deleted = {
            let mut storage = self.caches.write().await;
            let deleted = storage.prune_except(&self.config.cache_version);
            // The current generation must exist even if install never ran
            // against this storage (e.g. a version that precaches nothing).
            storage.open(&self.config.cache_version);
            deleted
        };

        let claimed = self.clients.write().await.claim();

        self.set_state(WorkerState::Activated).await;
        info!(
            version = %self.config.cache_version,
            deleted_caches = deleted.len(),
            claimed_clients = claimed,
            "Activated"
        );
        Ok(())
    }

    /// Force a waiting (installed) worker to activate immediately.
    pub async fn skip_waiting(&self) -> Result<(), SwError> {
        match self.state().await {
            WorkerState::Installed => self.activate().await,
            state => {
                // Nothing to do: not installed yet, or already past waiting.
                tracing::debug!(?state, "skip_waiting: no waiting worker");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{offline_backend, precache_routes, test_config, FakeBackend};
    use std::sync::Arc;
    use stillpoint_cache::CacheStorage;
    use stillpoint_store::StateStore;
    use tokio::sync::RwLock;

    #[tokio::test]
    async fn test_install_populates_current_generation() {
        let config = test_config();
        let backend = Arc::new(FakeBackend::with_routes(precache_routes()));
        let worker = OfflineWorker::new(config.clone(), backend);

        let count = worker.install().await.unwrap();

        assert_eq!(count, config.precache_manifest.len());
        assert_eq!(worker.state().await, WorkerState::Installed);
        assert!(worker.skip_waiting_requested());

        let caches = worker.caches();
        let storage = caches.read().await;
        assert_eq!(
            storage.get(&config.cache_version).unwrap().len(),
            config.precache_manifest.len()
        );
    }

    #[tokio::test]
    async fn test_install_failure_leaves_previous_version_in_control() {
        let caches = Arc::new(RwLock::new(CacheStorage::new()));
        let store = Arc::new(StateStore::new("stillpoint-state"));

        // Previous version installed and activated.
        let mut old_config = test_config();
        old_config.cache_version = "stillpoint-old".to_string();
        let good = Arc::new(FakeBackend::with_routes(precache_routes()));
        let old = OfflineWorker::with_storage(
            old_config,
            good,
            Arc::clone(&caches),
            Arc::clone(&store),
        );
        old.install().await.unwrap();
        old.activate().await.unwrap();

        // New version installs against a dead network.
        let new = OfflineWorker::with_storage(
            test_config(),
            offline_backend(),
            Arc::clone(&caches),
            Arc::clone(&store),
        );
        assert!(new.install().await.is_err());
        assert_eq!(new.state().await, WorkerState::Redundant);

        // The old generation is untouched and still the only one.
        let storage = caches.read().await;
        assert_eq!(storage.keys(), vec!["stillpoint-old"]);
    }

    #[tokio::test]
    async fn test_activate_keeps_exactly_one_generation() {
        let worker = {
            let backend = Arc::new(FakeBackend::with_routes(precache_routes()));
            OfflineWorker::new(test_config(), backend)
        };

        // Seed stale generations from imagined older deployments.
        {
            let caches = worker.caches();
            let mut storage = caches.write().await;
            storage.open("stillpoint-v0.0.1");
            storage.open("stillpoint-v0.0.2");
        }

        worker.install().await.unwrap();
        worker.activate().await.unwrap();

        let caches = worker.caches();
        let storage = caches.read().await;
        assert_eq!(storage.keys(), vec![worker.version()]);
        assert_eq!(worker.state().await, WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_activate_claims_clients() {
        let backend = Arc::new(FakeBackend::with_routes(precache_routes()));
        let worker = OfflineWorker::new(test_config(), backend);

        let origin = worker.config().origin.clone();
        {
            let clients = worker.clients();
            let mut clients = clients.write().await;
            clients.add(origin.join("./").unwrap());
            clients.add(origin.join("./settings").unwrap());
        }

        worker.install().await.unwrap();
        worker.activate().await.unwrap();

        let clients = worker.clients();
        let clients = clients.read().await;
        assert!(clients.all().iter().all(|c| c.controlled));
    }

    #[tokio::test]
    async fn test_skip_waiting_only_fires_from_installed() {
        let backend = Arc::new(FakeBackend::with_routes(precache_routes()));
        let worker = OfflineWorker::new(test_config(), backend);

        // Parsed: a no-op.
        worker.skip_waiting().await.unwrap();
        assert_eq!(worker.state().await, WorkerState::Parsed);

        worker.install().await.unwrap();
        worker.skip_waiting().await.unwrap();
        assert_eq!(worker.state().await, WorkerState::Activated);
    }
}
