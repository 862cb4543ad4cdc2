//! OAuth2 credential lifecycle: PKCE consent, silent refresh, revocation.
//!
//! The [`CredentialManager`] is the only writer of the `credential` store key.
//! Transfer tasks never touch it directly; when a request comes back 401
//! they call [`CredentialManager::force_refresh`], which serializes refreshes
//! so concurrent tasks share one token-endpoint round trip.

pub mod consent;
pub mod pkce;
pub mod transport;

use std::sync::Arc;

use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::errors::{AuthError, Result, SyncError};
use crate::http_client::HttpClient;
use crate::store::{keys, KeyValueStore};

pub use consent::{ConsentPrompt, ConsentResult, LoopbackConsent};
pub use pkce::PkcePair;
pub use transport::OAuthTransport;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Persisted OAuth2 credential for the signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    #[serde(rename = "accountEmail", default, skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
}

impl Credential {
    /// True when the access token outlives `now` by more than `buffer_ms`.
    pub fn is_live_at(&self, now_ms: i64, buffer_ms: i64) -> bool {
        self.expires_at > now_ms + buffer_ms
    }
}

/// Client that only knows the token endpoint; enough for code exchange and refresh.
type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a token issued at `now`.
fn expiry_of(token: &BasicTokenResponse, now: i64) -> i64 {
    let lifetime_ms = token
        .expires_in()
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS * 1000);
    now.saturating_add(lifetime_ms)
}

fn describe<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> String
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => response.to_string(),
        RequestTokenError::Parse(e, body) => {
            format!("{e}: {}", String::from_utf8_lossy(&body))
        }
        other => other.to_string(),
    }
}

pub struct CredentialManager {
    config: SyncConfig,
    http: HttpClient,
    store: KeyValueStore,
    consent: Arc<dyn ConsentPrompt>,
    refresh_lock: Mutex<()>,
}

impl CredentialManager {
    pub fn new(
        config: SyncConfig,
        http: HttpClient,
        store: KeyValueStore,
        consent: Arc<dyn ConsentPrompt>,
    ) -> Self {
        Self {
            config,
            http,
            store,
            consent,
            refresh_lock: Mutex::new(()),
        }
    }

    fn buffer_ms(&self) -> i64 {
        (self.config.expiry_buffer_secs as i64) * 1000
    }

    /// The stored credential, live or not.
    pub async fn current(&self) -> Result<Option<Credential>> {
        self.store.get::<Credential>(keys::CREDENTIAL).await
    }

    pub async fn is_authenticated(&self) -> Result<bool> {
        Ok(self.current().await?.is_some())
    }

    pub async fn account_email(&self) -> Result<Option<String>> {
        Ok(self.current().await?.and_then(|c| c.account_email))
    }

    /// Return a live credential, refreshing or prompting as needed.
    ///
    /// With `interactive == false` no UI is ever shown; a missing or
    /// unrefreshable credential yields [`AuthError::NotAuthenticated`].
    pub async fn authenticate(&self, interactive: bool) -> Result<Credential> {
        if let Some(stored) = self.current().await? {
            if stored.is_live_at(now_ms(), self.buffer_ms()) {
                return Ok(stored);
            }

            if stored.refresh_token.is_some() {
                match self.refresh_serialized(None).await {
                    Ok(fresh) => return Ok(fresh),
                    Err(e) => {
                        tracing::warn!("silent refresh failed, clearing credential: {}", e);
                        self.store.remove(&[keys::CREDENTIAL]).await?;
                    }
                }
            } else {
                tracing::info!("stored credential expired without a refresh token");
                self.store.remove(&[keys::CREDENTIAL]).await?;
            }
        }

        if !interactive {
            return Err(AuthError::NotAuthenticated.into());
        }
        self.interactive_sign_in().await
    }

    /// Access token guaranteed to expire after "now" plus the safety buffer.
    pub async fn get_valid_token(&self) -> Result<String> {
        Ok(self.authenticate(false).await?.access_token)
    }

    /// Refresh after the server rejected `stale_token`.
    ///
    /// If another task already replaced `stale_token` while this one waited
    /// for the refresh lock, the replacement is returned without another
    /// token-endpoint call.
    pub async fn force_refresh(&self, stale_token: &str) -> Result<String> {
        match self.refresh_serialized(Some(stale_token)).await {
            Ok(fresh) => Ok(fresh.access_token),
            Err(SyncError::Auth(e)) => {
                tracing::warn!("forced refresh failed, clearing credential: {}", e);
                self.store.remove(&[keys::CREDENTIAL]).await?;
                Err(e.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort provider revocation, then clear credential and settings.
    pub async fn revoke(&self) -> Result<()> {
        if let Some(stored) = self.current().await? {
            let token = stored
                .refresh_token
                .as_deref()
                .unwrap_or(&stored.access_token);
            let client = self.http.get_client().await;
            match client
                .post(&self.config.revoke_url)
                .form(&[("token", token)])
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => tracing::info!("token revoked"),
                Ok(resp) => tracing::warn!("revoke endpoint answered {}", resp.status()),
                Err(e) => tracing::warn!("revoke request failed: {}", e),
            }
        }

        self.store
            .remove(&[keys::CREDENTIAL, keys::SYNC_SETTINGS])
            .await
    }

    /// Build the provider consent URL for `pkce`. Returns the URL and the CSRF state.
    pub fn authorization_url(&self, pkce: &PkcePair) -> Result<(String, String)> {
        let auth_url = AuthUrl::new(self.config.auth_url.clone())
            .map_err(|e| SyncError::OAuth2(format!("Invalid auth URL: {e}")))?;
        let redirect_url = RedirectUrl::new(self.config.redirect_uri.clone())
            .map_err(|e| SyncError::OAuth2(format!("Invalid redirect URI: {e}")))?;

        let client = BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_redirect_uri(redirect_url);

        let (url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.config.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce.oauth2_challenge())
            .url();
        Ok((url.to_string(), csrf.secret().clone()))
    }

    async fn interactive_sign_in(&self) -> Result<Credential> {
        self.config.validate()?;

        let pkce = PkcePair::generate()?;
        let (url, state) = self.authorization_url(&pkce)?;
        let code = match self.consent.request_code(&url, &state).await? {
            ConsentResult::Granted { code } => code,
            ConsentResult::Denied => return Err(AuthError::Cancelled.into()),
        };

        let mut credential = self.exchange_code(&code, &pkce.verifier).await?;
        credential.account_email = self.fetch_account_email(&credential.access_token).await;

        self.store.set(keys::CREDENTIAL, &credential).await?;
        tracing::info!(
            "signed in{}",
            credential
                .account_email
                .as_deref()
                .map(|e| format!(" as {e}"))
                .unwrap_or_default()
        );
        Ok(credential)
    }

    fn token_client(&self) -> Result<TokenClient> {
        let token_url = TokenUrl::new(self.config.token_url.clone())
            .map_err(|e| SyncError::OAuth2(format!("Invalid token URL: {e}")))?;
        let redirect_url = RedirectUrl::new(self.config.redirect_uri.clone())
            .map_err(|e| SyncError::OAuth2(format!("Invalid redirect URI: {e}")))?;

        let mut client = BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url)
            .set_auth_type(AuthType::RequestBody);
        if !self.config.client_secret.is_empty() {
            client = client.set_client_secret(ClientSecret::new(self.config.client_secret.clone()));
        }
        Ok(client)
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Credential> {
        let client = self.token_client()?;
        let transport = OAuthTransport::new(self.http.get_client().await);
        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()))
            .request_async(&transport)
            .await
            .map_err(|e| AuthError::ExchangeFailed(describe(e)))?;

        Ok(Credential {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_at: expiry_of(&token, now_ms()),
            account_email: None,
        })
    }

    async fn fetch_account_email(&self, access_token: &str) -> Option<String> {
        let client = self.http.get_client().await;
        let result = client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(resp) => match resp.json::<UserInfo>().await {
                Ok(info) => info.email,
                Err(e) => {
                    tracing::debug!("userinfo response unreadable: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::debug!("userinfo lookup failed: {}", e);
                None
            }
        }
    }

    /// Refresh under the lock, skipping the call when another task already did.
    async fn refresh_serialized(&self, stale_token: Option<&str>) -> Result<Credential> {
        let _guard = self.refresh_lock.lock().await;

        let stored = self
            .current()
            .await?
            .ok_or(AuthError::NotAuthenticated)?;
        let replaced = stale_token.map_or(true, |stale| stored.access_token != stale);
        if replaced && stored.is_live_at(now_ms(), self.buffer_ms()) {
            return Ok(stored);
        }

        let refresh_token = stored
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token stored".into()))?;
        let fresh = self.request_refresh(&stored, &refresh_token).await?;
        self.store.set(keys::CREDENTIAL, &fresh).await?;
        tracing::debug!("access token refreshed");
        Ok(fresh)
    }

    async fn request_refresh(&self, stored: &Credential, refresh_token: &str) -> Result<Credential> {
        let client = self.token_client()?;
        let transport = OAuthTransport::new(self.http.get_client().await);
        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&transport)
            .await
            .map_err(|e| AuthError::RefreshFailed(describe(e)))?;

        let now = now_ms();
        let expires_at = expiry_of(&token, now);
        if expires_at <= now {
            return Err(AuthError::RefreshFailed("issued token is already expired".into()).into());
        }

        Ok(Credential {
            access_token: token.access_token().secret().clone(),
            refresh_token: token
                .refresh_token()
                .map(|t| t.secret().clone())
                .or_else(|| Some(refresh_token.to_string())),
            expires_at,
            account_email: stored.account_email.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct ScriptedConsent(ConsentResult);

    #[async_trait]
    impl ConsentPrompt for ScriptedConsent {
        async fn request_code(&self, _url: &str, _state: &str) -> Result<ConsentResult> {
            Ok(self.0.clone())
        }
    }

    fn config_for(server: &MockServer) -> SyncConfig {
        SyncConfig {
            client_id: "client-1".into(),
            client_secret: "secret-1".into(),
            token_url: format!("{}/token", server.uri()),
            revoke_url: format!("{}/revoke", server.uri()),
            userinfo_url: format!("{}/userinfo", server.uri()),
            ..SyncConfig::default()
        }
    }

    fn manager(config: SyncConfig, store: KeyValueStore, consent: ConsentResult) -> CredentialManager {
        CredentialManager::new(
            config,
            HttpClient::from_defaults().unwrap(),
            store,
            Arc::new(ScriptedConsent(consent)),
        )
    }

    fn credential(access: &str, expires_in_ms: i64) -> Credential {
        Credential {
            access_token: access.into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: now_ms() + expires_in_ms,
            account_email: Some("student@example.edu".into()),
        }
    }

    #[test]
    fn test_liveness_respects_buffer() {
        let cred = Credential {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: 100_000,
            account_email: None,
        };
        assert!(cred.is_live_at(0, 60_000));
        assert!(!cred.is_live_at(50_000, 60_000));
        assert!(!cred.is_live_at(100_000, 0));
    }

    #[test]
    fn test_authorization_url_parameters() {
        let mgr = manager(
            SyncConfig {
                client_id: "client-1".into(),
                ..SyncConfig::default()
            },
            KeyValueStore::in_memory(),
            ConsentResult::Denied,
        );
        let pkce = PkcePair::generate().unwrap();
        let (url, state) = mgr.authorization_url(&pkce).unwrap();

        let parsed = oauth2::url::Url::parse(&url).unwrap();
        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["code_challenge"], pkce.challenge);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8085/callback");
        assert_eq!(params["state"], state);
        assert!(params["scope"].contains("drive.file"));
    }

    #[tokio::test]
    async fn test_live_credential_returned_unchanged() {
        let server = MockServer::start().await;
        let store = KeyValueStore::in_memory();
        let stored = credential("live", 3_600_000);
        store.set(keys::CREDENTIAL, &stored).await.unwrap();

        let mgr = manager(config_for(&server), store, ConsentResult::Denied);
        assert_eq!(mgr.authenticate(false).await.unwrap(), stored);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_credential_non_interactive() {
        let server = MockServer::start().await;
        let mgr = manager(config_for(&server), KeyValueStore::in_memory(), ConsentResult::Denied);
        let err = mgr.get_valid_token().await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_denied_consent_is_cancelled() {
        let server = MockServer::start().await;
        let mgr = manager(config_for(&server), KeyValueStore::in_memory(), ConsentResult::Denied);
        let err = mgr.authenticate(true).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::Cancelled)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_credential_refreshes_keeping_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = KeyValueStore::in_memory();
        store.set(keys::CREDENTIAL, &credential("old", -1000)).await.unwrap();
        let mgr = manager(config_for(&server), store.clone(), ConsentResult::Denied);

        assert_eq!(mgr.get_valid_token().await.unwrap(), "fresh");
        let saved: Credential = store.get(keys::CREDENTIAL).await.unwrap().unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(saved.account_email.as_deref(), Some("student@example.edu"));
        assert!(saved.expires_at > now_ms());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let store = KeyValueStore::in_memory();
        store.set(keys::CREDENTIAL, &credential("old", -1000)).await.unwrap();
        let mgr = manager(config_for(&server), store.clone(), ConsentResult::Denied);

        let err = mgr.authenticate(false).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::NotAuthenticated)));
        assert!(store.get::<Credential>(keys::CREDENTIAL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_force_refresh_skips_when_already_replaced() {
        let server = MockServer::start().await;
        let store = KeyValueStore::in_memory();
        store.set(keys::CREDENTIAL, &credential("newer", 3_600_000)).await.unwrap();
        let mgr = manager(config_for(&server), store, ConsentResult::Denied);

        assert_eq!(mgr.force_refresh("older").await.unwrap(), "newer");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_clears_even_when_endpoint_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let store = KeyValueStore::in_memory();
        store.set(keys::CREDENTIAL, &credential("a", 3_600_000)).await.unwrap();
        store
            .set(keys::SYNC_SETTINGS, &serde_json::json!({"isAuthorized": true}))
            .await
            .unwrap();
        let mgr = manager(config_for(&server), store.clone(), ConsentResult::Denied);

        mgr.revoke().await.unwrap();
        assert!(store.get::<Credential>(keys::CREDENTIAL).await.unwrap().is_none());
        assert!(store
            .get::<serde_json::Value>(keys::SYNC_SETTINGS)
            .await
            .unwrap()
            .is_none());
        let err = mgr.get_valid_token().await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::NotAuthenticated)));
    }
}
