//! Google Drive client for the folder and file operations used by sync.
//!
//! Every request goes through [`TransferClient`], so throttling and token
//! expiry are handled below this layer.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use super::{
    CloudStorage, FileContent, RemoteFile, TransferClient, UploadAction, UploadResult,
    FOLDER_MIME_TYPE,
};
use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};

const FILE_FIELDS: &str = "id,name,mimeType,parents";
const LIST_FIELDS: &str = "files(id,name,mimeType,parents)";
const BOUNDARY_BYTES: usize = 18;
const BOUNDARY_ATTEMPTS: usize = 4;

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    parents: [&'a str; 1],
}

/// Escape a value for a single-quoted Drive query literal.
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build a `multipart/related` body: JSON metadata part, then the content part.
fn multipart_related(boundary: &str, metadata: &[u8], content: &FileContent) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + content.bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content.mime_type).as_bytes());
    body.extend_from_slice(&content.bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Random multipart boundary that occurs in none of `parts`.
fn new_boundary(parts: &[&[u8]]) -> Result<String> {
    let rng = SystemRandom::new();
    for _ in 0..BOUNDARY_ATTEMPTS {
        let mut bytes = [0u8; BOUNDARY_BYTES];
        rng.fill(&mut bytes)
            .map_err(|_| std::io::Error::other("system randomness unavailable"))?;
        let boundary = format!("drivesync_{}", URL_SAFE_NO_PAD.encode(bytes));
        let needle = boundary.as_bytes();
        if !parts
            .iter()
            .any(|part| part.windows(needle.len()).any(|w| w == needle))
        {
            return Ok(boundary);
        }
    }
    Err(SyncError::Transfer {
        status: 0,
        body: "could not pick a multipart boundary absent from the upload".into(),
    })
}

#[derive(Clone)]
pub struct GDriveClient {
    transfer: TransferClient,
    api_base: String,
    upload_base: String,
}

impl GDriveClient {
    pub fn new(transfer: TransferClient, config: &SyncConfig) -> Self {
        Self {
            transfer,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
        }
    }

    async fn query_files(&self, q: &str) -> Result<Vec<RemoteFile>> {
        let url = format!("{}/files", self.api_base);
        let list: FileList = self
            .transfer
            .send_json(|c| {
                c.get(&url)
                    .query(&[("q", q), ("fields", LIST_FIELDS), ("spaces", "drive")])
            })
            .await?;
        Ok(list.files)
    }

    /// Fetch metadata for a file or folder by id.
    pub async fn get_metadata(&self, file_id: &str) -> Result<RemoteFile> {
        let url = format!("{}/files/{file_id}", self.api_base);
        self.transfer
            .send_json(|c| c.get(&url).query(&[("fields", FILE_FIELDS)]))
            .await
    }

    /// First non-trashed file named `name` directly inside `folder_id`.
    pub async fn find_file(&self, name: &str, folder_id: &str) -> Result<Option<RemoteFile>> {
        let q = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            escape_query(folder_id)
        );
        Ok(self.query_files(&q).await?.into_iter().next())
    }

    /// Create a new file from metadata plus content in one multipart request.
    pub async fn upload_file(
        &self,
        name: &str,
        folder_id: &str,
        content: &FileContent,
    ) -> Result<RemoteFile> {
        let metadata = serde_json::to_vec(&CreateRequest {
            name,
            mime_type: &content.mime_type,
            parents: [folder_id],
        })?;
        let boundary = new_boundary(&[metadata.as_slice(), content.bytes.as_slice()])?;
        let body = multipart_related(&boundary, &metadata, content);
        let content_type = format!("multipart/related; boundary={boundary}");
        let url = format!("{}/files", self.upload_base);

        self.transfer
            .send_json(|c| {
                c.post(&url)
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .header(reqwest::header::CONTENT_TYPE, &content_type)
                    .body(body.clone())
            })
            .await
    }

    /// Replace the content of an existing file (media-only update).
    pub async fn update_file(&self, file_id: &str, content: &FileContent) -> Result<RemoteFile> {
        let url = format!("{}/files/{file_id}", self.upload_base);
        self.transfer
            .send_json(|c| {
                c.patch(&url)
                    .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
                    .header(reqwest::header::CONTENT_TYPE, &content.mime_type)
                    .body(content.bytes.clone())
            })
            .await
    }
}

#[async_trait]
impl CloudStorage for GDriveClient {
    async fn validate_folder_id(&self, folder_id: &str) -> Result<bool> {
        match self.get_metadata(folder_id).await {
            Ok(file) => Ok(file.is_folder()),
            // Missing or inaccessible ids come back as plain non-2xx responses.
            Err(SyncError::Transfer { status, .. }) => {
                tracing::debug!("folder {} did not resolve ({})", folder_id, status);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn search_folder(&self, name: &str, parent_id: &str) -> Result<Option<RemoteFile>> {
        let q = format!(
            "mimeType = '{FOLDER_MIME_TYPE}' and name = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            escape_query(parent_id)
        );
        Ok(self.query_files(&q).await?.into_iter().next())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<RemoteFile> {
        let url = format!("{}/files", self.api_base);
        let request = CreateRequest {
            name,
            mime_type: FOLDER_MIME_TYPE,
            parents: [parent_id],
        };
        let folder: RemoteFile = self
            .transfer
            .send_json(|c| c.post(&url).query(&[("fields", FILE_FIELDS)]).json(&request))
            .await?;
        tracing::info!("created folder '{}' ({})", name, folder.id);
        Ok(folder)
    }

    async fn upload_or_update_file(
        &self,
        name: &str,
        folder_id: &str,
        content: FileContent,
    ) -> Result<UploadResult> {
        match self.find_file(name, folder_id).await? {
            Some(existing) => {
                let file = self.update_file(&existing.id, &content).await?;
                tracing::debug!("updated '{}' ({})", name, file.id);
                Ok(UploadResult {
                    file,
                    action: UploadAction::Updated,
                })
            }
            None => {
                let file = self.upload_file(name, folder_id, &content).await?;
                tracing::debug!("uploaded '{}' ({})", name, file.id);
                Ok(UploadResult {
                    file,
                    action: UploadAction::Created,
                })
            }
        }
    }
}
