use std::sync::Arc;

use async_trait::async_trait;
use drivesync_lib::auth::{ConsentPrompt, ConsentResult, Credential};
use drivesync_lib::cloud::{
    CloudStorage, FileContent, GDriveClient, RetryPolicy, TransferClient, UploadAction,
};
use drivesync_lib::config::{ConfigManager, SyncConfig};
use drivesync_lib::daemon::TriggerOutcome;
use drivesync_lib::errors::Result;
use drivesync_lib::http_client::HttpClient;
use drivesync_lib::services::{Components, ServiceRegistry};
use drivesync_lib::source::{
    FileDescriptor, HttpContentFetcher, SubjectFileSet, SubjectSource,
};
use drivesync_lib::store::{keys, KeyValueStore};
use drivesync_lib::sync::{SyncPhase, SyncSettings};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const FOLDER: &str = "application/vnd.google-apps.folder";

struct GrantingConsent;

#[async_trait]
impl ConsentPrompt for GrantingConsent {
    async fn request_code(&self, _url: &str, _state: &str) -> Result<ConsentResult> {
        Ok(ConsentResult::Granted {
            code: "auth-code-1".into(),
        })
    }
}

struct Subjects(Vec<SubjectFileSet>);

#[async_trait]
impl SubjectSource for Subjects {
    async fn load_subjects(&self) -> Result<Vec<SubjectFileSet>> {
        Ok(self.0.clone())
    }
}

fn config_for(server: &MockServer) -> SyncConfig {
    SyncConfig {
        client_id: "client-1".into(),
        token_url: format!("{}/token", server.uri()),
        revoke_url: format!("{}/revoke", server.uri()),
        userinfo_url: format!("{}/userinfo", server.uri()),
        api_base: format!("{}/drive", server.uri()),
        upload_base: format!("{}/upload", server.uri()),
        retry_base_delay_ms: 1,
        inter_request_delay_ms: 0,
        ..SyncConfig::default()
    }
}

fn query_contains(fragment: &'static str) -> impl Fn(&Request) -> bool {
    move |req: &Request| {
        req.url
            .query_pairs()
            .any(|(k, v)| k == "q" && v.contains(fragment))
    }
}

#[tokio::test]
async fn sign_in_sets_up_folder_and_first_sync_uploads() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "refresh_token": "rt-1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "email": "student@example.edu" })),
        )
        .mount(&server)
        .await;

    // Nothing exists yet.
    Mock::given(method("GET"))
        .and(path("/drive/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drive/files"))
        .and(body_string_contains("Course Files (Synced)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "root-folder", "name": "Course Files (Synced)", "mimeType": FOLDER
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/files/root-folder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "root-folder", "name": "Course Files (Synced)", "mimeType": FOLDER
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drive/files"))
        .and(body_string_contains("Algorithms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "subject-folder", "name": "Algorithms", "mimeType": FOLDER
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/portal/week1.pdf"))
        .and(header("cookie", "session=abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.7".to_vec()),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/files"))
        .and(header("authorization", "Bearer at-1"))
        .and(body_string_contains("%PDF-1.7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-1", "name": "week1.pdf", "mimeType": "application/pdf"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::TempDir::new().unwrap();
    let config = config_for(&server);
    let http = HttpClient::from_defaults().unwrap();
    let subjects = vec![SubjectFileSet {
        subject_code: "EBC-ALG".into(),
        display_name: "EBC-ALG Algorithms".into(),
        folder_reference: None,
        files: vec![FileDescriptor {
            name: "week1.pdf".into(),
            remote_link: format!("{}/portal/week1.pdf", server.uri()),
            subfolder: None,
        }],
    }];
    let services = ServiceRegistry::with_components(
        Arc::new(ConfigManager::initialize(tmp.path()).await.unwrap()),
        config,
        http.clone(),
        KeyValueStore::in_memory(),
        Components {
            consent: Arc::new(GrantingConsent),
            storage: None,
            fetcher: Arc::new(HttpContentFetcher::new(http, Some("session=abc".into()))),
            subjects: Arc::new(Subjects(subjects)),
        },
    );

    let credential = services.authenticate(true).await.unwrap();
    assert_eq!(credential.account_email.as_deref(), Some("student@example.edu"));

    let settings = SyncSettings::load(&services.store).await.unwrap();
    assert!(settings.is_authorized);
    assert_eq!(settings.root_folder_id.as_deref(), Some("root-folder"));

    let outcome = services.trigger_sync().await.unwrap();
    let TriggerOutcome::Completed(summary) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(summary.files_total, 1);
    assert_eq!(summary.files_synced, 1);
    assert!(summary.error.is_none());

    let status = services.get_status().await.unwrap();
    assert_eq!(status.phase(), SyncPhase::Synced);
}

#[tokio::test]
async fn existing_file_is_updated_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/files"))
        .and(query_contains("name = 'notes.pdf'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [{ "id": "file-9", "name": "notes.pdf", "mimeType": "application/pdf" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/upload/files/file-9"))
        .and(header("content-type", "application/pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-9", "name": "notes.pdf", "mimeType": "application/pdf"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/files"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let drive = drive_client(&server, "at-1").await;
    let result = drive
        .upload_or_update_file(
            "notes.pdf",
            "subject-folder",
            FileContent::new(b"v2".to_vec(), "application/pdf"),
        )
        .await
        .unwrap();
    assert_eq!(result.action, UploadAction::Updated);
    assert_eq!(result.file.id, "file-9");
}

#[tokio::test]
async fn validate_folder_id_treats_missing_and_non_folders_as_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/files/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/files/a-file"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "a-file", "name": "x.pdf", "mimeType": "application/pdf"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/files/a-folder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "a-folder", "name": "Root", "mimeType": FOLDER
        })))
        .mount(&server)
        .await;

    let drive = drive_client(&server, "at-1").await;
    assert!(!drive.validate_folder_id("gone").await.unwrap());
    assert!(!drive.validate_folder_id("a-file").await.unwrap());
    assert!(drive.validate_folder_id("a-folder").await.unwrap());
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-fresh",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = KeyValueStore::in_memory();
    store
        .set(
            keys::CREDENTIAL,
            &Credential {
                access_token: "at-stale".into(),
                refresh_token: Some("rt-1".into()),
                expires_at: 0,
                account_email: None,
            },
        )
        .await
        .unwrap();

    let tmp = tempfile::TempDir::new().unwrap();
    let http = HttpClient::from_defaults().unwrap();
    let services = ServiceRegistry::with_components(
        Arc::new(ConfigManager::initialize(tmp.path()).await.unwrap()),
        config_for(&server),
        http.clone(),
        store.clone(),
        Components {
            consent: Arc::new(GrantingConsent),
            storage: None,
            fetcher: Arc::new(HttpContentFetcher::new(http, None)),
            subjects: Arc::new(Subjects(Vec::new())),
        },
    );

    let creds = services.credentials();
    let (a, b, c) = tokio::join!(
        creds.get_valid_token(),
        creds.get_valid_token(),
        creds.get_valid_token()
    );
    for token in [a, b, c] {
        assert_eq!(token.unwrap(), "at-fresh");
    }

    let stored: Credential = store.get(keys::CREDENTIAL).await.unwrap().unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn expired_credential_is_refreshed_once_before_first_drive_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-fresh",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/files/root-folder"))
        .and(header("authorization", "Bearer at-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "root-folder", "name": "Course Files (Synced)", "mimeType": FOLDER
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/files"))
        .and(header("authorization", "Bearer at-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drive/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "subject-folder", "name": "Algorithms", "mimeType": FOLDER
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/portal/week1.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/files"))
        .and(header("authorization", "Bearer at-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-1", "name": "week1.pdf", "mimeType": "application/pdf"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = KeyValueStore::in_memory();
    store
        .set(
            keys::CREDENTIAL,
            &Credential {
                access_token: "at-stale".into(),
                refresh_token: Some("rt-1".into()),
                expires_at: chrono::Utc::now().timestamp_millis() - 60_000,
                account_email: Some("student@example.edu".into()),
            },
        )
        .await
        .unwrap();
    SyncSettings {
        is_authorized: true,
        root_folder_id: Some("root-folder".into()),
        root_folder_name: Some("Course Files (Synced)".into()),
    }
    .save(&store)
    .await
    .unwrap();

    let tmp = tempfile::TempDir::new().unwrap();
    let http = HttpClient::from_defaults().unwrap();
    let services = ServiceRegistry::with_components(
        Arc::new(ConfigManager::initialize(tmp.path()).await.unwrap()),
        config_for(&server),
        http.clone(),
        store.clone(),
        Components {
            consent: Arc::new(GrantingConsent),
            storage: None,
            fetcher: Arc::new(HttpContentFetcher::new(http, None)),
            subjects: Arc::new(Subjects(vec![SubjectFileSet {
                subject_code: "EBC-ALG".into(),
                display_name: "Algorithms".into(),
                folder_reference: None,
                files: vec![FileDescriptor {
                    name: "week1.pdf".into(),
                    remote_link: format!("{}/portal/week1.pdf", server.uri()),
                    subfolder: None,
                }],
            }])),
        },
    );

    let outcome = services.trigger_sync().await.unwrap();
    let TriggerOutcome::Completed(summary) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(summary.files_synced, 1);

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    assert_eq!(paths.iter().filter(|p| **p == "/token").count(), 1);
    let first_token = paths.iter().position(|p| *p == "/token").unwrap();
    let first_drive = paths.iter().position(|p| p.starts_with("/drive/files")).unwrap();
    assert!(first_token < first_drive, "refresh must precede Drive calls: {paths:?}");

    let stored: Credential = store.get(keys::CREDENTIAL).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "at-fresh");
}

async fn drive_client(server: &MockServer, token: &str) -> GDriveClient {
    let store = KeyValueStore::in_memory();
    store
        .set(
            keys::CREDENTIAL,
            &Credential {
                access_token: token.into(),
                refresh_token: None,
                expires_at: chrono::Utc::now().timestamp_millis() + 3_600_000,
                account_email: None,
            },
        )
        .await
        .unwrap();
    let config = config_for(server);
    let http = HttpClient::from_defaults().unwrap();
    let credentials = Arc::new(drivesync_lib::auth::CredentialManager::new(
        config.clone(),
        http.clone(),
        store,
        Arc::new(GrantingConsent),
    ));
    let transfer = TransferClient::new(http, credentials, RetryPolicy::from_config(&config));
    GDriveClient::new(transfer, &config)
}
