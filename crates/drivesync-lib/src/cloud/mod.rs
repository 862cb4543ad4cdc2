pub mod gdrive;
pub mod transfer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use gdrive::GDriveClient;
pub use transfer::{RetryPolicy, TokenSource, TransferClient};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Used when neither the fetch response nor the caller names a content type.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Metadata for a remote file or folder, referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl RemoteFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// Downloaded bytes ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl FileContent {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Which branch of upload-or-update ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub file: RemoteFile,
    pub action: UploadAction,
}

/// Folder and file operations the sync run needs from a storage provider.
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// True when `folder_id` resolves to a folder.
    async fn validate_folder_id(&self, folder_id: &str) -> Result<bool>;

    async fn search_folder(&self, name: &str, parent_id: &str) -> Result<Option<RemoteFile>>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<RemoteFile>;

    /// Search-or-create; safe to call repeatedly.
    async fn ensure_folder(&self, name: &str, parent_id: &str) -> Result<RemoteFile> {
        match self.search_folder(name, parent_id).await? {
            Some(existing) => Ok(existing),
            None => self.create_folder(name, parent_id).await,
        }
    }

    /// Walk a `/`-separated folder path below `parent_id`, creating missing
    /// segments. Returns the id of the last segment.
    ///
    /// Not safe to run concurrently for the same path: two callers can both
    /// miss the search and both create the folder.
    async fn ensure_folder_path(&self, path: &str, parent_id: &str) -> Result<String> {
        let mut current = parent_id.to_string();
        for segment in subfolder_segments(path) {
            current = self.ensure_folder(segment, &current).await?.id;
        }
        Ok(current)
    }

    /// Create `name` directly inside `folder_id`, or replace its content when
    /// a file of that name already exists there.
    async fn upload_or_update_file(
        &self,
        name: &str,
        folder_id: &str,
        content: FileContent,
    ) -> Result<UploadResult>;
}

/// Split a `/`-separated subfolder hint into its non-empty segments.
pub fn subfolder_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
