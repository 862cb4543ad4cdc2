use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::dynamic::SyncConfig;
use crate::errors::{Result, SyncError};

type ChangeCallback = Box<dyn Fn(&SyncConfig) + Send + Sync>;

/// Thread-safe holder for `SyncConfig` with file persistence and change callbacks.
///
/// Every mutation is written to `config.json` before listeners are notified.
pub struct ConfigManager {
    config: Arc<RwLock<SyncConfig>>,
    config_path: PathBuf,
    on_change: Arc<RwLock<Vec<ChangeCallback>>>,
}

impl ConfigManager {
    /// Load `config.json` from `config_dir`.
    ///
    /// Creates the file with defaults when missing and falls back to defaults
    /// (with a warning) when it cannot be read or parsed.
    pub async fn initialize(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.json");
        let config = Self::load_or_create_config(&config_path).await;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            on_change: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Return a clone of the current configuration.
    pub async fn get_config(&self) -> SyncConfig {
        self.config.read().await.clone()
    }

    /// Apply a partial update from a JSON map of key-value pairs.
    ///
    /// Keys are the camelCase names used in `config.json`. Unknown keys are
    /// rejected so typos surface instead of being silently dropped.
    pub async fn update_config(&self, updates: serde_json::Map<String, Value>) -> Result<()> {
        let mut config = self.config.write().await;

        let mut current_value = serde_json::to_value(&*config)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;
        if let Some(obj) = current_value.as_object_mut() {
            for (key, value) in updates {
                // portalCookie is omitted from the serialized form while unset.
                if !obj.contains_key(&key) && key != "portalCookie" {
                    return Err(SyncError::Config(format!("Unknown config key '{key}'")));
                }
                obj.insert(key, value);
            }
        }

        *config = serde_json::from_value(current_value)
            .map_err(|e| SyncError::Config(format!("Failed to apply config updates: {e}")))?;

        Self::write_config(&self.config_path, &config).await?;
        self.notify_change(&config).await;

        Ok(())
    }

    /// Reset all fields to their default values, persist, and notify.
    pub async fn reset_to_defaults(&self) -> Result<()> {
        let mut config = self.config.write().await;
        *config = SyncConfig::default();

        Self::write_config(&self.config_path, &config).await?;
        self.notify_change(&config).await;

        Ok(())
    }

    /// Register a callback that fires on every config change.
    pub async fn register_on_change(
        &self,
        callback: impl Fn(&SyncConfig) + Send + Sync + 'static,
    ) {
        self.on_change.write().await.push(Box::new(callback));
    }

    async fn load_or_create_config(path: &Path) -> SyncConfig {
        if path.exists() {
            match tokio::fs::read_to_string(path).await {
                Ok(contents) => match serde_json::from_str::<SyncConfig>(&contents) {
                    Ok(cfg) => return cfg,
                    Err(e) => {
                        tracing::warn!(
                            "Failed to parse config file {}: {}. Using defaults.",
                            path.display(),
                            e
                        );
                        return SyncConfig::default();
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "Failed to read config file {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    return SyncConfig::default();
                }
            }
        }

        let defaults = SyncConfig::default();
        if let Err(e) = Self::write_config(path, &defaults).await {
            tracing::warn!(
                "Failed to create default config file {}: {}",
                path.display(),
                e
            );
        }
        defaults
    }

    async fn write_config(path: &Path, config: &SyncConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Config(format!("Failed to create config dir: {e}")))?;
        }

        let json = serde_json::to_string_pretty(config)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;

        tokio::fs::write(path, json)
            .await
            .map_err(|e| SyncError::Config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    async fn notify_change(&self, config: &SyncConfig) {
        let callbacks = self.on_change.read().await;
        for cb in callbacks.iter() {
            cb(config);
        }
    }
}
