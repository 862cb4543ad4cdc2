//! Sync settings, the broadcast sync status, and the board that publishes it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::errors::Result;
use crate::store::{keys, KeyValueStore};

/// Destination configuration written by the setup flow, cleared on disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(rename = "isAuthorized")]
    pub is_authorized: bool,
    #[serde(rename = "rootFolderId")]
    pub root_folder_id: Option<String>,
    #[serde(rename = "rootFolderName")]
    pub root_folder_name: Option<String>,
}

impl SyncSettings {
    pub async fn load(store: &KeyValueStore) -> Result<Self> {
        Ok(store
            .get::<SyncSettings>(keys::SYNC_SETTINGS)
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, store: &KeyValueStore) -> Result<()> {
        store.set(keys::SYNC_SETTINGS, self).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
}

/// Last observed state of the sync engine. Overwritten on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    #[serde(rename = "isSyncing")]
    pub is_syncing: bool,
    /// Milliseconds since the Unix epoch of the last completed run.
    #[serde(rename = "lastSyncTime")]
    pub last_sync_time: Option<i64>,
    pub error: Option<String>,
    #[serde(rename = "currentSubject", skip_serializing_if = "Option::is_none", default)]
    pub current_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub progress: Option<SyncProgress>,
}

/// Coarse state shown by status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Syncing,
    Synced,
    Error,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Synced => write!(f, "synced"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl SyncStatus {
    pub fn phase(&self) -> SyncPhase {
        if self.is_syncing {
            SyncPhase::Syncing
        } else if self.error.is_some() {
            SyncPhase::Error
        } else if self.last_sync_time.is_some() {
            SyncPhase::Synced
        } else {
            SyncPhase::Idle
        }
    }

    /// Local-time rendering of `last_sync_time`, or "never".
    pub fn last_sync_display(&self) -> String {
        self.last_sync_time
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|t| {
                t.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| "never".to_string())
    }
}

/// Publishes [`SyncStatus`] through the shared store.
#[derive(Clone)]
pub struct StatusBoard {
    store: KeyValueStore,
}

impl StatusBoard {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    pub async fn current(&self) -> Result<SyncStatus> {
        Ok(self
            .store
            .get::<SyncStatus>(keys::SYNC_STATUS)
            .await?
            .unwrap_or_default())
    }

    pub async fn publish(&self, status: &SyncStatus) -> Result<()> {
        self.store.set(keys::SYNC_STATUS, status).await
    }

    /// Read-modify-write of the current status; returns what was written.
    pub async fn update(&self, apply: impl FnOnce(&mut SyncStatus)) -> Result<SyncStatus> {
        let mut status = self.current().await?;
        apply(&mut status);
        self.publish(&status).await?;
        Ok(status)
    }

    /// Record a failure that ended a run before the orchestrator could.
    pub async fn record_failure(&self, message: &str) -> Result<SyncStatus> {
        self.update(|s| {
            s.is_syncing = false;
            s.error = Some(message.to_string());
            s.current_subject = None;
            s.progress = None;
        })
        .await
    }

    /// Stream of every status written after this call.
    ///
    /// Lagged notifications are skipped; the next write delivers the latest
    /// value anyway.
    pub fn subscribe(&self) -> impl Stream<Item = SyncStatus> + Send + Unpin + 'static {
        BroadcastStream::new(self.store.subscribe()).filter_map(|change| {
            let change = change.ok()?;
            if change.key != keys::SYNC_STATUS {
                return None;
            }
            match change.new_value {
                Some(value) => serde_json::from_value(value).ok(),
                None => Some(SyncStatus::default()),
            }
        })
    }
}
