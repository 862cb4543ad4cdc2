//! Service wiring.
//!
//! `ServiceRegistry` is built once at startup and passed by reference to the
//! command handlers and the daemon. It owns every long-lived component and
//! exposes the operations a front end needs.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::auth::{ConsentPrompt, Credential, CredentialManager, LoopbackConsent};
use crate::cloud::{CloudStorage, GDriveClient, RetryPolicy, TransferClient};
use crate::config::{AppPaths, ConfigManager, SyncConfig};
use crate::daemon::{ExecutionBridge, Scheduler, SyncWorker, TriggerOutcome};
use crate::errors::{Result, SyncError};
use crate::http_client::HttpClient;
use crate::source::{ContentFetcher, HttpContentFetcher, JsonSubjectSource, SubjectSource};
use crate::store::{FileBackend, KeyValueStore};
use crate::sync::{
    StatusBoard, SyncOptions, SyncOrchestrator, SyncOutcome, SyncSettings, SyncStatus,
};

/// Parent id of the account's top-level folder.
const ACCOUNT_ROOT: &str = "root";

/// Read-only view of the connection, answered without network calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    #[serde(rename = "isAuthenticated")]
    pub is_authenticated: bool,
    #[serde(rename = "isAuthorized")]
    pub is_authorized: bool,
    #[serde(rename = "accountEmail")]
    pub account_email: Option<String>,
    #[serde(rename = "rootFolderName")]
    pub root_folder_name: Option<String>,
}

/// Pluggable collaborators. `storage: None` means Google Drive.
pub struct Components {
    pub consent: Arc<dyn ConsentPrompt>,
    pub storage: Option<Arc<dyn CloudStorage>>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub subjects: Arc<dyn SubjectSource>,
}

impl Components {
    /// Loopback consent, HTTP fetching and the JSON subject export.
    pub fn production(config: &SyncConfig, http: &HttpClient) -> Self {
        let timeout = Duration::from_secs(config.consent_timeout_secs);
        let consent = LoopbackConsent::new(&config.redirect_uri, timeout).or_else(|e| {
            tracing::warn!("{}; falling back to the default redirect URI", e);
            LoopbackConsent::new(&SyncConfig::default().redirect_uri, timeout)
        });
        let headless = std::env::var_os("DRIVESYNC_NO_BROWSER").is_some();
        let consent: Arc<dyn ConsentPrompt> = match consent {
            Ok(c) if headless => Arc::new(c.without_browser()),
            Ok(c) => Arc::new(c),
            Err(_) => Arc::new(NoConsent),
        };

        Self {
            consent,
            storage: None,
            fetcher: Arc::new(HttpContentFetcher::new(
                http.clone(),
                config.portal_cookie.clone(),
            )),
            subjects: Arc::new(JsonSubjectSource::new(&config.subjects_file)),
        }
    }
}

/// Used only when no redirect URI can be parsed at all.
struct NoConsent;

#[async_trait::async_trait]
impl ConsentPrompt for NoConsent {
    async fn request_code(
        &self,
        _authorization_url: &str,
        _state: &str,
    ) -> Result<crate::auth::ConsentResult> {
        Err(SyncError::Config(
            "redirectUri is not a valid URL".into(),
        ))
    }
}

pub struct ServiceRegistry {
    pub config_manager: Arc<ConfigManager>,
    pub http_client: HttpClient,
    pub store: KeyValueStore,
    config: SyncConfig,
    credentials: Arc<CredentialManager>,
    storage: Arc<dyn CloudStorage>,
    board: StatusBoard,
    subjects: Arc<dyn SubjectSource>,
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: Arc<Scheduler>,
}

impl ServiceRegistry {
    /// Load config and persisted state from `paths` and wire production components.
    pub async fn initialize(paths: &AppPaths) -> Result<Self> {
        tokio::fs::create_dir_all(&paths.home_dir).await?;
        let config_manager = Arc::new(ConfigManager::initialize(&paths.home_dir).await?);

        let mut config = config_manager.get_config().await;
        if let Some(id) = &paths.client_id_override {
            config.client_id = id.clone();
        }
        if let Some(secret) = &paths.client_secret_override {
            config.client_secret = secret.clone();
        }

        let http_client = HttpClient::new(&config)?;
        let store = KeyValueStore::new(Arc::new(FileBackend::new(
            &paths.state_file,
            &paths.state_lock_file,
        )));
        let components = Components::production(&config, &http_client);

        let services = Self::with_components(config_manager, config, http_client, store, components);
        services.register_config_listeners().await;
        Ok(services)
    }

    pub fn with_components(
        config_manager: Arc<ConfigManager>,
        config: SyncConfig,
        http_client: HttpClient,
        store: KeyValueStore,
        components: Components,
    ) -> Self {
        let credentials = Arc::new(CredentialManager::new(
            config.clone(),
            http_client.clone(),
            store.clone(),
            components.consent,
        ));

        let storage: Arc<dyn CloudStorage> = match components.storage {
            Some(storage) => storage,
            None => {
                let transfer = TransferClient::new(
                    http_client.clone(),
                    credentials.clone(),
                    RetryPolicy::from_config(&config),
                );
                Arc::new(GDriveClient::new(transfer, &config))
            }
        };

        let board = StatusBoard::new(store.clone());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            storage.clone(),
            components.fetcher,
            credentials.clone(),
            store.clone(),
            SyncOptions::from_config(&config),
        ));
        let bridge = Arc::new(ExecutionBridge::new(
            SyncWorker::new(orchestrator.clone(), components.subjects.clone()),
            board.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            bridge,
            Duration::from_secs(config.sync_interval_minutes.max(1) * 60),
        ));

        Self {
            config_manager,
            http_client,
            store,
            config,
            credentials,
            storage,
            board,
            subjects: components.subjects,
            orchestrator,
            scheduler,
        }
    }

    /// Rebuild the shared HTTP client whenever the config file changes.
    pub async fn register_config_listeners(&self) {
        let http = self.http_client.clone();
        self.config_manager
            .register_on_change(move |cfg| {
                let http = http.clone();
                let cfg = cfg.clone();
                tokio::spawn(async move {
                    if let Err(e) = http.update_from_config(&cfg).await {
                        tracing::warn!("Failed to update HttpClient from config: {e}");
                    }
                });
            })
            .await;
    }

    /// Effective configuration, environment overrides applied.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Sign in. After an interactive sign-in the destination folder is set up.
    pub async fn authenticate(&self, interactive: bool) -> Result<Credential> {
        let credential = self.credentials.authenticate(interactive).await?;
        if interactive {
            self.setup_destination().await?;
        }
        Ok(credential)
    }

    /// Find or create the root folder and mark the destination authorized.
    pub async fn setup_destination(&self) -> Result<SyncSettings> {
        let current = SyncSettings::load(&self.store).await?;
        let name = current
            .root_folder_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.config.default_root_folder_name.clone());

        let folder = self.storage.ensure_folder(&name, ACCOUNT_ROOT).await?;
        let settings = SyncSettings {
            is_authorized: true,
            root_folder_id: Some(folder.id),
            root_folder_name: Some(name),
        };
        settings.save(&self.store).await?;
        tracing::info!(
            "sync destination ready: '{}'",
            settings.root_folder_name.as_deref().unwrap_or_default()
        );
        Ok(settings)
    }

    /// Revoke the credential and forget the destination.
    pub async fn sign_out(&self) -> Result<()> {
        self.credentials.revoke().await
    }

    /// Gated, out-of-cadence sync through the execution context.
    pub async fn trigger_sync(&self) -> Result<TriggerOutcome> {
        self.scheduler.sync_now().await
    }

    /// Sync a single subject by code, in this process. Gated like `trigger_sync`.
    ///
    /// Returns `None` when the destination is not authorized.
    pub async fn sync_subject(&self, subject_code: &str) -> Result<Option<SyncOutcome>> {
        if !self.scheduler.is_authorized().await? {
            return Ok(None);
        }
        let subject = self
            .subjects
            .load_subjects()
            .await?
            .into_iter()
            .find(|s| s.subject_code == subject_code)
            .ok_or_else(|| SyncError::Config(format!("Unknown subject '{subject_code}'")))?;
        self.orchestrator.sync_subject(&subject).await.map(Some)
    }

    pub async fn get_status(&self) -> Result<SyncStatus> {
        self.board.current().await
    }

    pub fn subscribe_status(&self) -> impl Stream<Item = SyncStatus> + Send + Unpin + 'static {
        self.board.subscribe()
    }

    pub async fn connection_status(&self) -> Result<ConnectionStatus> {
        let credential = self.credentials.current().await?;
        let settings = SyncSettings::load(&self.store).await?;
        Ok(ConnectionStatus {
            is_authenticated: credential.is_some(),
            is_authorized: settings.is_authorized,
            account_email: credential.and_then(|c| c.account_email),
            root_folder_name: settings.root_folder_name,
        })
    }

    /// Run the scheduler until `shutdown` is cancelled.
    pub async fn run_daemon(&self, shutdown: CancellationToken) {
        self.scheduler.run(shutdown).await
    }
}
