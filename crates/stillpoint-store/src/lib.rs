//! # Stillpoint Store
//!
//! Asynchronous key-value state store for the Stillpoint offline worker.
//!
//! The worker records small pieces of state between events, most notably
//! the timestamp of the last completed session, which the daily reminder
//! check reads. Synchronous page storage is not reliably available inside a
//! worker context, so this store gives that data an explicit async
//! read/write contract instead.
//!
//! Values are JSON so the stored shapes stay schema-free, matching the
//! payloads the worker already handles.

use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::trace;

/// Errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Value error for {key}: {reason}")]
    ValueError { key: String, reason: String },
}

/// A named asynchronous key→JSON store.
#[derive(Debug, Default)]
pub struct StateStore {
    /// Store name.
    name: String,

    /// Stored records.
    records: RwLock<HashMap<String, JsonValue>>,
}

impl StateStore {
    /// Create a new store.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read a raw value.
    pub async fn get(&self, key: &str) -> Option<JsonValue> {
        self.records.read().await.get(key).cloned()
    }

    /// Read a value and deserialize it.
    ///
    /// `Ok(None)` means the key is absent; a present but mismatched value is
    /// a [`StoreError::ValueError`].
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::ValueError {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Write a value, replacing any previous one.
    pub async fn put<T: Serialize>(&self, key: &str, value: T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|e| StoreError::ValueError {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        trace!(store = %self.name, key, "Store write");
        self.records.write().await.insert(key.to_string(), value);
        Ok(())
    }

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> bool {
        self.records.write().await.remove(key).is_some()
    }

    /// Check whether a key exists.
    pub async fn contains(&self, key: &str) -> bool {
        self.records.read().await.contains_key(key)
    }

    /// All keys, unordered.
    pub async fn keys(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    /// Number of records.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Remove all records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}
