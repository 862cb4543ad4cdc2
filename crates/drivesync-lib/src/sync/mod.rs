//! Sync orchestration: subjects in order, files through a bounded pool.
//!
//! A run validates [`SyncSettings`], makes sure the cached root folder still
//! exists, then handles one subject at a time. Files of a subject are fetched
//! and uploaded concurrently (bounded by `concurrencyLimit`). A failing file
//! or subject is logged and counted but never stops the run; only an
//! authentication failure does.

pub mod naming;
pub mod pool;
pub mod status;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::auth::now_ms;
use crate::cloud::{CloudStorage, TokenSource, UploadAction, UploadResult};
use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::fileops::lock::LockGuard;
use crate::source::{ContentFetcher, FileDescriptor, SubjectFileSet};
use crate::store::KeyValueStore;

pub use naming::subject_folder_name;
pub use pool::TransferPool;
pub use status::{StatusBoard, SyncPhase, SyncProgress, SyncSettings, SyncStatus};

/// Parent id the storage provider uses for the account's top level.
const ACCOUNT_ROOT: &str = "root";

pub type ProgressCallback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub concurrency_limit: usize,
    pub inter_request_delay: Duration,
    pub default_root_folder_name: String,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit,
            inter_request_delay: Duration::from_millis(config.inter_request_delay_ms),
            default_root_folder_name: config.default_root_folder_name.clone(),
        }
    }
}

/// Counts for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectReport {
    pub subject_code: String,
    pub folder_id: Option<String>,
    pub files_total: usize,
    pub synced: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
}

/// Counts for a whole run plus the status it ended with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub subjects: Vec<SubjectReport>,
    pub subjects_failed: usize,
    pub status: SyncStatus,
}

impl SyncReport {
    pub fn files_total(&self) -> usize {
        self.subjects.iter().map(|s| s.files_total).sum()
    }

    pub fn files_synced(&self) -> usize {
        self.subjects.iter().map(|s| s.synced).sum()
    }

    /// Failed files, counting every file of a subject that failed outright.
    pub fn files_failed(&self) -> usize {
        self.subjects.iter().map(|s| s.failed).sum()
    }

    fn summary_error(&self) -> Option<String> {
        let failed = self.files_failed();
        if failed == 0 && self.subjects_failed == 0 {
            return None;
        }
        Some(
            SyncError::PartialFailure {
                failed,
                total: self.files_total(),
            }
            .to_string(),
        )
    }
}

/// Result of a trigger: a finished run, or nothing because one was in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped,
}

/// Clears the in-progress flag when a run ends, however it ends. The
/// cross-process run lock, when there is one, is released with it.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    _lock: Option<LockGuard>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Folder id per distinct subfolder hint; `None` when it could not be resolved.
type SubfolderTargets = HashMap<String, Option<String>>;

fn subfolder_hint(file: &FileDescriptor) -> Option<&str> {
    file.subfolder
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub struct SyncOrchestrator {
    storage: Arc<dyn CloudStorage>,
    fetcher: Arc<dyn ContentFetcher>,
    tokens: Arc<dyn TokenSource>,
    store: KeyValueStore,
    board: StatusBoard,
    options: SyncOptions,
    running: AtomicBool,
    on_progress: Option<ProgressCallback>,
}

impl SyncOrchestrator {
    pub fn new(
        storage: Arc<dyn CloudStorage>,
        fetcher: Arc<dyn ContentFetcher>,
        tokens: Arc<dyn TokenSource>,
        store: KeyValueStore,
        options: SyncOptions,
    ) -> Self {
        Self {
            storage,
            fetcher,
            tokens,
            board: StatusBoard::new(store.clone()),
            store,
            options,
            running: AtomicBool::new(false),
            on_progress: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the run for this process and, when state is shared on disk,
    /// for every other process using it. `None` means a run is in progress.
    fn try_begin(&self) -> Result<Option<RunGuard<'_>>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }
        let mut guard = RunGuard {
            running: &self.running,
            _lock: None,
        };

        if let Some(lock) = self.store.run_lock() {
            match lock.try_acquire() {
                Ok(held) => guard._lock = Some(held),
                Err(SyncError::LockConflict { .. }) => {
                    tracing::info!(lock = %lock.path().display(), "sync running in another process");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(guard))
    }

    /// Sync every subject in order.
    pub async fn run_full_sync(&self, subjects: &[SubjectFileSet]) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin()? else {
            tracing::info!("sync already in progress, skipping trigger");
            return Ok(SyncOutcome::Skipped);
        };
        tracing::info!("starting sync of {} subjects", subjects.len());
        self.run(subjects).await.map(SyncOutcome::Completed)
    }

    /// Sync a single subject with the same validation and status updates.
    pub async fn sync_subject(&self, subject: &SubjectFileSet) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin()? else {
            tracing::info!("sync already in progress, skipping {}", subject.subject_code);
            return Ok(SyncOutcome::Skipped);
        };
        self.run(std::slice::from_ref(subject))
            .await
            .map(SyncOutcome::Completed)
    }

    async fn run(&self, subjects: &[SubjectFileSet]) -> Result<SyncReport> {
        let settings = SyncSettings::load(&self.store).await?;
        let cached_root = match settings.root_folder_id.as_deref() {
            Some(id) if settings.is_authorized && !id.is_empty() => id.to_string(),
            _ => {
                let err = SyncError::Config("Google Drive is not set up: missing root folder".into());
                self.board.record_failure(&err.to_string()).await?;
                return Err(err);
            }
        };

        self.board
            .update(|s| {
                s.is_syncing = true;
                s.error = None;
                s.current_subject = None;
                s.progress = None;
            })
            .await?;

        match self.run_subjects(&settings, &cached_root, subjects).await {
            Ok(mut report) => {
                let summary = report.summary_error();
                report.status = self
                    .board
                    .update(|s| {
                        s.is_syncing = false;
                        s.last_sync_time = Some(now_ms());
                        s.error = summary;
                        s.current_subject = None;
                        s.progress = None;
                    })
                    .await?;
                self.notify(&report.status);
                tracing::info!(
                    "sync finished: {} of {} files synced, {} failed",
                    report.files_synced(),
                    report.files_total(),
                    report.files_failed()
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("sync aborted: {}", e);
                let status = self.board.record_failure(&e.to_string()).await?;
                self.notify(&status);
                Err(e)
            }
        }
    }

    async fn run_subjects(
        &self,
        settings: &SyncSettings,
        cached_root: &str,
        subjects: &[SubjectFileSet],
    ) -> Result<SyncReport> {
        // Refresh an expired token before the first resource call.
        self.tokens.access_token().await?;
        let root_id = self.resolve_root(settings, cached_root).await?;

        let mut report = SyncReport::default();
        for subject in subjects {
            if subject.subject_code.trim().is_empty() || subject.files.is_empty() {
                tracing::debug!("skipping subject '{}' with no files", subject.display_name);
                continue;
            }

            match self.sync_one(&root_id, subject).await {
                Ok(subject_report) => report.subjects.push(subject_report),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::warn!(subject = %subject.subject_code, "subject failed: {}", e);
                    report.subjects_failed += 1;
                    report.subjects.push(SubjectReport {
                        subject_code: subject.subject_code.clone(),
                        files_total: subject.files.len(),
                        failed: subject.files.len(),
                        ..SubjectReport::default()
                    });
                }
            }
        }
        Ok(report)
    }

    /// Return a usable root folder id, repairing the cached one if needed.
    async fn resolve_root(&self, settings: &SyncSettings, cached_root: &str) -> Result<String> {
        if self.storage.validate_folder_id(cached_root).await? {
            return Ok(cached_root.to_string());
        }

        let name = settings
            .root_folder_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.options.default_root_folder_name.clone());
        tracing::warn!(
            "root folder {} is no longer a folder, looking up '{}'",
            cached_root,
            name
        );

        let folder = self.storage.ensure_folder(&name, ACCOUNT_ROOT).await?;
        SyncSettings {
            root_folder_id: Some(folder.id.clone()),
            root_folder_name: Some(name),
            ..settings.clone()
        }
        .save(&self.store)
        .await?;
        Ok(folder.id)
    }

    async fn sync_one(&self, root_id: &str, subject: &SubjectFileSet) -> Result<SubjectReport> {
        let folder_name = subject_folder_name(&subject.display_name);
        let folder = self.storage.ensure_folder(&folder_name, root_id).await?;
        let total = subject.files.len();
        tracing::info!(subject = %subject.subject_code, "syncing {} files into '{}'", total, folder_name);

        self.set_progress(&subject.display_name, 0, total).await?;

        // Pool workers sharing a subfolder would race its search-or-create.
        let targets = self.resolve_subfolders(&folder.id, subject).await?;

        let mut report = SubjectReport {
            subject_code: subject.subject_code.clone(),
            folder_id: Some(folder.id.clone()),
            files_total: total,
            ..SubjectReport::default()
        };

        let jobs = subject
            .files
            .iter()
            .map(|file| self.transfer_file(&folder.id, &targets, file));
        let mut pool = TransferPool::new(self.options.concurrency_limit, jobs);
        tracing::debug!(limit = pool.limit(), queued = pool.queued(), "transfer pool ready");

        // Status writes happen beside the pool so slow state I/O never
        // holds back the transfers still in flight.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<usize>();
        let transfers = async move {
            let mut done = 0;
            while let Some((name, result)) = pool.next().await {
                done += 1;
                match result {
                    Ok(UploadResult { action, .. }) => {
                        report.synced += 1;
                        match action {
                            UploadAction::Created => report.created += 1,
                            UploadAction::Updated => report.updated += 1,
                        }
                    }
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => {
                        tracing::warn!(subject = %subject.subject_code, file = %name, "file failed: {}", e);
                        report.failed += 1;
                    }
                }
                tracing::trace!(in_flight = pool.in_flight(), queued = pool.queued(), "transfer finished");
                let _ = progress_tx.send(done);
            }
            Ok(report)
        };
        let publish = async {
            while let Some(done) = progress_rx.recv().await {
                self.set_progress(&subject.display_name, done, total).await?;
            }
            Ok::<(), SyncError>(())
        };

        let (report, published) = tokio::join!(transfers, publish);
        let report = report?;
        published?;
        Ok(report)
    }

    /// Resolve each distinct subfolder hint of `subject` once, in order.
    ///
    /// A hint that fails to resolve only fails the files that carry it.
    async fn resolve_subfolders(
        &self,
        subject_folder_id: &str,
        subject: &SubjectFileSet,
    ) -> Result<SubfolderTargets> {
        let mut targets = SubfolderTargets::new();
        for path in subject.files.iter().filter_map(subfolder_hint) {
            if targets.contains_key(path) {
                continue;
            }
            let target = match self.storage.ensure_folder_path(path, subject_folder_id).await {
                Ok(id) => Some(id),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::warn!(subject = %subject.subject_code, subfolder = %path, "subfolder unavailable: {}", e);
                    None
                }
            };
            targets.insert(path.to_string(), target);
        }
        Ok(targets)
    }

    async fn transfer_file(
        &self,
        folder_id: &str,
        targets: &SubfolderTargets,
        file: &FileDescriptor,
    ) -> (String, Result<UploadResult>) {
        let result = async {
            let target = match subfolder_hint(file) {
                Some(path) => targets
                    .get(path)
                    .and_then(|t| t.as_deref())
                    .ok_or_else(|| SyncError::FolderUnavailable(path.to_string()))?,
                None => folder_id,
            };
            let content = self.fetcher.fetch(&file.remote_link).await?;
            let uploaded = self
                .storage
                .upload_or_update_file(&file.name, target, content)
                .await?;
            if !self.options.inter_request_delay.is_zero() {
                tokio::time::sleep(self.options.inter_request_delay).await;
            }
            Ok(uploaded)
        }
        .await;
        (file.name.clone(), result)
    }

    async fn set_progress(&self, subject: &str, current: usize, total: usize) -> Result<()> {
        let status = self
            .board
            .update(|s| {
                s.current_subject = Some(subject.to_string());
                s.progress = Some(SyncProgress { current, total });
            })
            .await?;
        self.notify(&status);
        Ok(())
    }

    fn notify(&self, status: &SyncStatus) {
        if let Some(callback) = &self.on_progress {
            callback(status);
        }
    }
}
