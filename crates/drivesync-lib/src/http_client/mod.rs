//! Shared HTTP client with connection pooling, rebuilt on config changes.
//!
//! Wraps `reqwest::Client`; clones are cheap and share the same inner client.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};

const USER_AGENT: &str = concat!("drivesync/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<RwLock<reqwest::Client>>,
}

impl HttpClient {
    /// Build a new `HttpClient` configured from the given `SyncConfig`.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Self::build_client(config)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(client)),
        })
    }

    /// Build an `HttpClient` using `SyncConfig::default()`.
    pub fn from_defaults() -> Result<Self> {
        Self::new(&SyncConfig::default())
    }

    /// Get a clone of the current `reqwest::Client`.
    pub async fn get_client(&self) -> reqwest::Client {
        self.inner.read().await.clone()
    }

    /// Rebuild the inner client from an updated `SyncConfig`.
    ///
    /// Wired to `ConfigManager::register_on_change` by the service registry.
    pub async fn update_from_config(&self, config: &SyncConfig) -> Result<()> {
        let new_client = Self::build_client(config)?;
        *self.inner.write().await = new_client;
        Ok(())
    }

    fn build_client(config: &SyncConfig) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout as u64))
            .connect_timeout(Duration::from_secs(config.connect_timeout as u64))
            .pool_max_idle_per_host(config.max_idle_conns_per_host as usize)
            .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout as u64))
            .build()
            .map_err(SyncError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_defaults() {
        let client = HttpClient::from_defaults().expect("should build from defaults");
        let _inner = client.get_client().await;
    }

    #[tokio::test]
    async fn test_update_from_config_shared_by_clones() {
        let client = HttpClient::from_defaults().expect("should build");
        let cloned = client.clone();

        let config = SyncConfig {
            timeout: 120,
            max_idle_conns_per_host: 2,
            ..SyncConfig::default()
        };
        client
            .update_from_config(&config)
            .await
            .expect("should update");

        assert!(Arc::ptr_eq(&client.inner, &cloned.inner));
        let _inner = cloned.get_client().await;
    }
}
