//! Storage backends behind [`KeyValueStore`](super::KeyValueStore).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::errors::{Result, SyncError};
use crate::fileops::lock::FileLock;
use crate::fileops::write_atomic;

const LOCK_ATTEMPTS: u32 = 100;
const LOCK_INTERVAL: Duration = Duration::from_millis(20);
const RUN_LOCK_FILE: &str = "sync.lock";

/// Raw JSON persistence for the key-value store.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>>;
    async fn save(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// Lock held for the duration of a sync run by whichever process runs it.
    /// Process-local backends have no peers to exclude.
    fn run_lock(&self) -> Option<FileLock> {
        None
    }
}

/// Process-local backend; contents vanish with the process.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// One JSON object on disk, shared by every process using the same path.
///
/// Reads go to disk each time so a value written by another process is
/// seen on the next access. Writes hold the advisory lock for the whole
/// read-modify-write cycle.
pub struct FileBackend {
    path: PathBuf,
    lock: FileLock,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: FileLock::new(lock_path),
        }
    }

    async fn read_document(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Map::new()),
            Ok(contents) => match serde_json::from_str::<Value>(&contents)? {
                Value::Object(map) => Ok(map),
                _ => Err(SyncError::Store(format!(
                    "{} does not contain a JSON object",
                    self.path.display()
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(&self, doc: &Map<String, Value>) -> Result<()> {
        let json = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.path, &json).await
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_document().await?.remove(key))
    }

    async fn save(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.acquire(LOCK_ATTEMPTS, LOCK_INTERVAL).await?;
        let mut doc = self.read_document().await?;
        doc.insert(key.to_string(), value);
        self.write_document(&doc).await
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.lock.acquire(LOCK_ATTEMPTS, LOCK_INTERVAL).await?;
        let mut doc = self.read_document().await?;
        let before = doc.len();
        for key in keys {
            doc.remove(*key);
        }
        if doc.len() != before {
            self.write_document(&doc).await?;
        }
        Ok(())
    }

    fn run_lock(&self) -> Option<FileLock> {
        Some(FileLock::new(self.path.with_file_name(RUN_LOCK_FILE)))
    }
}
