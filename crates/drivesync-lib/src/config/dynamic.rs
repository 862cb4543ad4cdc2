use oauth2::url::Url;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};

/// Runtime configuration persisted as `config.json`.
///
/// Missing keys fall back to their defaults so older files keep loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    #[serde(rename = "authUrl")]
    pub auth_url: String,
    #[serde(rename = "tokenUrl")]
    pub token_url: String,
    #[serde(rename = "revokeUrl")]
    pub revoke_url: String,
    #[serde(rename = "userinfoUrl")]
    pub userinfo_url: String,
    #[serde(rename = "redirectUri")]
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    #[serde(rename = "apiBase")]
    pub api_base: String,
    #[serde(rename = "uploadBase")]
    pub upload_base: String,
    #[serde(rename = "defaultRootFolderName")]
    pub default_root_folder_name: String,
    #[serde(rename = "concurrencyLimit")]
    pub concurrency_limit: usize,
    #[serde(rename = "syncIntervalMinutes")]
    pub sync_interval_minutes: u64,
    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(rename = "retryBaseDelayMs")]
    pub retry_base_delay_ms: u64,
    #[serde(rename = "interRequestDelayMs")]
    pub inter_request_delay_ms: u64,
    #[serde(rename = "expiryBufferSecs")]
    pub expiry_buffer_secs: u64,
    #[serde(rename = "consentTimeoutSecs")]
    pub consent_timeout_secs: u64,
    pub timeout: u32,
    #[serde(rename = "connectTimeout")]
    pub connect_timeout: u32,
    #[serde(rename = "idleConnTimeout")]
    pub idle_conn_timeout: u32,
    #[serde(rename = "maxIdleConnsPerHost")]
    pub max_idle_conns_per_host: u32,
    #[serde(rename = "subjectsFile")]
    pub subjects_file: String,
    #[serde(rename = "portalCookie", skip_serializing_if = "Option::is_none")]
    pub portal_cookie: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            revoke_url: "https://oauth2.googleapis.com/revoke".into(),
            userinfo_url: "https://www.googleapis.com/oauth2/v3/userinfo".into(),
            redirect_uri: "http://127.0.0.1:8085/callback".into(),
            scopes: vec![
                "https://www.googleapis.com/auth/drive.file".into(),
                "openid".into(),
                "email".into(),
            ],
            api_base: "https://www.googleapis.com/drive/v3".into(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".into(),
            default_root_folder_name: "Course Files (Synced)".into(),
            concurrency_limit: 3,
            sync_interval_minutes: 5,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            inter_request_delay_ms: 100,
            expiry_buffer_secs: 60,
            consent_timeout_secs: 300,
            timeout: 30,
            connect_timeout: 10,
            idle_conn_timeout: 90,
            max_idle_conns_per_host: 16,
            subjects_file: String::new(),
            portal_cookie: None,
        }
    }
}

impl SyncConfig {
    /// Reject provider settings that cannot possibly complete an OAuth flow.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(SyncError::Config(
                "invalid provider configuration: clientId is empty".into(),
            ));
        }
        for (name, value) in [
            ("authUrl", &self.auth_url),
            ("tokenUrl", &self.token_url),
            ("revokeUrl", &self.revoke_url),
            ("redirectUri", &self.redirect_uri),
            ("apiBase", &self.api_base),
            ("uploadBase", &self.upload_base),
        ] {
            Url::parse(value).map_err(|e| {
                SyncError::Config(format!(
                    "invalid provider configuration: {name} '{value}': {e}"
                ))
            })?;
        }
        if self.concurrency_limit == 0 {
            return Err(SyncError::Config("concurrencyLimit must be at least 1".into()));
        }
        Ok(())
    }
}
