//! Unified key-value store for persisted state.
//!
//! Credentials, sync settings and the last sync status all live here under
//! fixed keys. Every write is broadcast as a [`StoreChange`] so observers in
//! other tasks (the scheduler, the CLI `sync watch` command, the execution
//! context) learn about updates without polling.

pub mod backend;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::errors::Result;
use crate::fileops::lock::FileLock;

pub use backend::{FileBackend, MemoryBackend, StoreBackend};

/// Well-known store keys.
pub mod keys {
    pub const CREDENTIAL: &str = "credential";
    pub const SYNC_SETTINGS: &str = "syncSettings";
    pub const SYNC_STATUS: &str = "syncStatus";
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A change notification: the key and its new value (`None` when removed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub key: String,
    #[serde(rename = "newValue")]
    pub new_value: Option<Value>,
}

/// Typed access to a [`StoreBackend`] plus change broadcast.
///
/// Cheap to clone; clones share the backend and the change channel.
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn StoreBackend>,
    changes: broadcast::Sender<StoreChange>,
}

impl KeyValueStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { backend, changes }
    }

    /// In-memory store, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.load(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.backend.save(key, value.clone()).await?;
        self.notify(key, Some(value));
        Ok(())
    }

    /// Remove several keys in one backend write.
    pub async fn remove(&self, keys: &[&str]) -> Result<()> {
        self.backend.remove(keys).await?;
        for key in keys {
            self.notify(key, None);
        }
        Ok(())
    }

    /// Cross-process run lock for the backing state, if it is shared.
    pub fn run_lock(&self) -> Option<FileLock> {
        self.backend.run_lock()
    }

    /// Subscribe to every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, key: &str, new_value: Option<Value>) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            new_value,
        });
    }
}
