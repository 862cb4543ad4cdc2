//! Inbound collaborators: where subjects come from and how their files are fetched.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cloud::{FileContent, DEFAULT_MIME_TYPE};
use crate::errors::{Result, SyncError};
use crate::http_client::HttpClient;

/// One document published for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    #[serde(rename = "remoteLink")]
    pub remote_link: String,
    /// Optional `/`-separated folder path below the subject folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfolder: Option<String>,
}

/// Everything published for one subject, as exported by the portal scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFileSet {
    #[serde(rename = "subjectCode")]
    pub subject_code: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "folderReference", default, skip_serializing_if = "Option::is_none")]
    pub folder_reference: Option<String>,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

/// Supplies every subject for the signed-in account.
#[async_trait]
pub trait SubjectSource: Send + Sync {
    async fn load_subjects(&self) -> Result<Vec<SubjectFileSet>>;
}

/// Downloads a document by its remote link.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, remote_link: &str) -> Result<FileContent>;
}

/// The export is either a list or an object keyed by subject code.
#[derive(Deserialize)]
#[serde(untagged)]
enum SubjectExport {
    List(Vec<SubjectFileSet>),
    Keyed(BTreeMap<String, SubjectFileSet>),
}

/// Reads the scraper's JSON export from disk on every call.
pub struct JsonSubjectSource {
    path: PathBuf,
}

impl JsonSubjectSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SubjectSource for JsonSubjectSource {
    async fn load_subjects(&self) -> Result<Vec<SubjectFileSet>> {
        if self.path.as_os_str().is_empty() {
            return Err(SyncError::Config(
                "subjectsFile is not set; run `drivesync config set subjectsFile <path>`".into(),
            ));
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        let subjects = match serde_json::from_str::<SubjectExport>(&contents)? {
            SubjectExport::List(list) => list,
            SubjectExport::Keyed(map) => map.into_values().collect(),
        };

        let total = subjects.len();
        let subjects: Vec<_> = subjects
            .into_iter()
            .filter(|s| !s.subject_code.trim().is_empty())
            .collect();
        if subjects.len() != total {
            tracing::debug!("skipped {} subjects without a code", total - subjects.len());
        }
        Ok(subjects)
    }
}

/// Fetches documents over HTTP, optionally with the portal session cookie.
pub struct HttpContentFetcher {
    http: HttpClient,
    cookie: Option<String>,
}

impl HttpContentFetcher {
    pub fn new(http: HttpClient, cookie: Option<String>) -> Self {
        Self { http, cookie }
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, remote_link: &str) -> Result<FileContent> {
        let client = self.http.get_client().await;
        let mut request = client.get(remote_link);
        if let Some(cookie) = &self.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Transfer {
                status: status.as_u16(),
                body,
            });
        }

        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();
        let bytes = resp.bytes().await?;
        Ok(FileContent::new(bytes.to_vec(), mime_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_json_source_list_form() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("subjects.json");
        std::fs::write(
            &file,
            r#"[
                {"subjectCode": "EBC-ALG", "displayName": "EBC-ALG Algorithms",
                 "files": [{"name": "l1.pdf", "remoteLink": "https://portal/1", "subfolder": "Lectures"}]},
                {"subjectCode": "", "displayName": "Orphan", "files": []}
            ]"#,
        )
        .unwrap();

        let subjects = JsonSubjectSource::new(&file).load_subjects().await.unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].files[0].subfolder.as_deref(), Some("Lectures"));
        assert!(subjects[0].folder_reference.is_none());
    }

    #[tokio::test]
    async fn test_json_source_keyed_form() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("subjects.json");
        std::fs::write(
            &file,
            r#"{"EBC-ALG": {"subjectCode": "EBC-ALG", "displayName": "Algorithms", "files": []}}"#,
        )
        .unwrap();

        let subjects = JsonSubjectSource::new(&file).load_subjects().await.unwrap();
        assert_eq!(subjects[0].subject_code, "EBC-ALG");
    }

    #[tokio::test]
    async fn test_json_source_unset_path() {
        let err = JsonSubjectSource::new("").load_subjects().await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_fetcher_sends_cookie_and_reads_mime() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc/1"))
            .and(header("cookie", "SESSID=abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf; charset=binary")
                    .set_body_bytes(b"%PDF".to_vec()),
            )
            .mount(&server)
            .await;

        let fetcher = HttpContentFetcher::new(
            HttpClient::from_defaults().unwrap(),
            Some("SESSID=abc".into()),
        );
        let content = fetcher
            .fetch(&format!("{}/doc/1", server.uri()))
            .await
            .unwrap();
        assert_eq!(content.mime_type, "application/pdf");
        assert_eq!(content.bytes, b"%PDF");
    }

    #[tokio::test]
    async fn test_fetcher_non_success_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpContentFetcher::new(HttpClient::from_defaults().unwrap(), None);
        let err = fetcher
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transfer { status: 404, .. }));
    }
}
