//! In-memory fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::cloud::{
    CloudStorage, FileContent, RemoteFile, TokenSource, UploadAction, UploadResult,
    FOLDER_MIME_TYPE,
};
use crate::errors::{AuthError, Result, SyncError};
use crate::source::{ContentFetcher, FileDescriptor, SubjectFileSet, SubjectSource};

pub fn subject(code: &str, display_name: &str, files: &[&str]) -> SubjectFileSet {
    SubjectFileSet {
        subject_code: code.into(),
        display_name: display_name.into(),
        folder_reference: None,
        files: files
            .iter()
            .map(|name| FileDescriptor {
                name: (*name).into(),
                remote_link: format!("https://portal.example/files/{name}"),
                subfolder: None,
            })
            .collect(),
    }
}

#[derive(Clone)]
struct Folder {
    id: String,
    name: String,
    parent: String,
}

/// Folder tree and file index kept in memory; counts every call.
#[derive(Default)]
pub struct FakeStorage {
    folders: Mutex<Vec<Folder>>,
    files: Mutex<HashMap<(String, String), String>>,
    next_id: AtomicUsize,
    calls: AtomicUsize,
    failing_folders: Vec<String>,
    delay: Option<Duration>,
}

impl FakeStorage {
    /// Storage with one folder named like the default root under the account root.
    pub fn with_root(root_id: &str) -> Self {
        let storage = Self::default();
        storage.folders.lock().unwrap().push(Folder {
            id: root_id.into(),
            name: "Course Files (Synced)".into(),
            parent: "root".into(),
        });
        storage
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Folder creation for `name` fails with a server error.
    pub fn with_failing_folder(mut self, name: &str) -> Self {
        self.failing_folders.push(name.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn has_folder(&self, name: &str, parent: &str) -> bool {
        self.folders
            .lock()
            .unwrap()
            .iter()
            .any(|f| f.name == name && f.parent == parent)
    }

    pub fn folder_count(&self, name: &str) -> usize {
        self.folders
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.name == name)
            .count()
    }

    /// Id of the folder `name` under `parent`, if one exists.
    pub fn folder_id(&self, name: &str, parent: &str) -> Option<String> {
        self.folders
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.name == name && f.parent == parent)
            .map(|f| f.id.clone())
    }

    pub fn has_file(&self, name: &str, folder_id: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .contains_key(&(folder_id.to_string(), name.to_string()))
    }

    async fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn new_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn remote(id: &str, name: &str, mime_type: &str, parent: &str) -> RemoteFile {
        RemoteFile {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            parents: vec![parent.into()],
        }
    }
}

#[async_trait]
impl CloudStorage for FakeStorage {
    async fn validate_folder_id(&self, folder_id: &str) -> Result<bool> {
        self.tick().await;
        Ok(self.folders.lock().unwrap().iter().any(|f| f.id == folder_id))
    }

    async fn search_folder(&self, name: &str, parent_id: &str) -> Result<Option<RemoteFile>> {
        self.tick().await;
        Ok(self
            .folders
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.name == name && f.parent == parent_id)
            .map(|f| Self::remote(&f.id, &f.name, FOLDER_MIME_TYPE, &f.parent)))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<RemoteFile> {
        self.tick().await;
        if self.failing_folders.iter().any(|f| f == name) {
            return Err(SyncError::Transfer {
                status: 500,
                body: format!("cannot create {name}"),
            });
        }
        let folder = Folder {
            id: self.new_id("folder"),
            name: name.into(),
            parent: parent_id.into(),
        };
        self.folders.lock().unwrap().push(folder.clone());
        Ok(Self::remote(&folder.id, name, FOLDER_MIME_TYPE, parent_id))
    }

    async fn upload_or_update_file(
        &self,
        name: &str,
        folder_id: &str,
        content: FileContent,
    ) -> Result<UploadResult> {
        self.tick().await;
        let key = (folder_id.to_string(), name.to_string());
        let existing = self.files.lock().unwrap().get(&key).cloned();
        let (id, action) = match existing {
            Some(id) => (id, UploadAction::Updated),
            None => {
                let id = self.new_id("file");
                self.files.lock().unwrap().insert(key, id.clone());
                (id, UploadAction::Created)
            }
        };
        Ok(UploadResult {
            file: Self::remote(&id, name, &content.mime_type, folder_id),
            action,
        })
    }
}

/// Returns the link as content; fails for links containing any marker.
#[derive(Default)]
pub struct FakeFetcher {
    fail_markers: Vec<String>,
}

impl FakeFetcher {
    pub fn failing_on(markers: &[&str]) -> Self {
        Self {
            fail_markers: markers.iter().map(|m| (*m).to_string()).collect(),
        }
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, remote_link: &str) -> Result<FileContent> {
        if self.fail_markers.iter().any(|m| remote_link.contains(m.as_str())) {
            return Err(SyncError::Transfer {
                status: 404,
                body: format!("{remote_link} not found"),
            });
        }
        Ok(FileContent::new(remote_link.as_bytes().to_vec(), "application/pdf"))
    }
}

/// Fails every load by panicking, like a scraper export hitting a bug.
/// Panics while loading, like a worker hitting a bug mid-run.
pub struct PanickingSubjects;

#[async_trait]
impl SubjectSource for PanickingSubjects {
    async fn load_subjects(&self) -> Result<Vec<SubjectFileSet>> {
        panic!("subject export is corrupt")
    }
}

/// Hands out a fixed token, or fails as if nobody ever signed in.
pub struct StaticTokens {
    token: Option<String>,
    pub refreshes: AtomicUsize,
}

impl StaticTokens {
    pub fn new(token: &str) -> Self {
        Self {
            token: Some(token.into()),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            token: None,
            refreshes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokens {
    async fn access_token(&self) -> Result<String> {
        self.token
            .clone()
            .ok_or_else(|| AuthError::NotAuthenticated.into())
    }

    async fn refresh_rejected(&self, _stale_token: &str) -> Result<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.access_token().await
    }
}

pub struct StaticSubjects(pub Vec<SubjectFileSet>);

#[async_trait]
impl SubjectSource for StaticSubjects {
    async fn load_subjects(&self) -> Result<Vec<SubjectFileSet>> {
        Ok(self.0.clone())
    }
}
