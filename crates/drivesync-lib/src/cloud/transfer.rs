//! Authenticated request wrapper with rate-limit backoff and 401 recovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::auth::CredentialManager;
use crate::config::SyncConfig;
use crate::errors::{AuthError, Result, SyncError};
use crate::http_client::HttpClient;

/// Supplies bearer tokens to the transfer layer.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;

    /// Replace a token the server just rejected.
    async fn refresh_rejected(&self, stale_token: &str) -> Result<String>;
}

#[async_trait]
impl TokenSource for CredentialManager {
    async fn access_token(&self) -> Result<String> {
        self.get_valid_token().await
    }

    async fn refresh_rejected(&self, stale_token: &str) -> Result<String> {
        self.force_refresh(stale_token).await
    }
}

/// Backoff for 429/403 responses: `base_delay * 2^attempt`, attempt from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN
}

/// Sends requests with a bearer token and recovers from throttling and expiry.
///
/// The 401 path and the rate-limit budget are independent: a refresh-and-retry
/// neither consumes nor resets the backoff attempts.
#[derive(Clone)]
pub struct TransferClient {
    http: HttpClient,
    tokens: Arc<dyn TokenSource>,
    policy: RetryPolicy,
}

impl TransferClient {
    pub fn new(http: HttpClient, tokens: Arc<dyn TokenSource>, policy: RetryPolicy) -> Self {
        Self {
            http,
            tokens,
            policy,
        }
    }

    /// Send the request produced by `build` until it succeeds or a limit is hit.
    ///
    /// `build` is called once per attempt and must not attach its own
    /// `Authorization` header.
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let client = self.http.get_client().await;
        let mut token = self.tokens.access_token().await?;
        let mut refreshed = false;
        let mut attempt: u32 = 0;

        loop {
            let resp = build(&client).bearer_auth(&token).send().await?;
            let status = resp.status();

            if status.is_success() {
                return Ok(resp);
            }

            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(AuthError::ExpiredBeyondRecovery.into());
                }
                tracing::debug!("access token rejected, refreshing once");
                refreshed = true;
                token = self.tokens.refresh_rejected(&token).await?;
                continue;
            }

            if is_rate_limited(status) {
                if attempt >= self.policy.max_retries {
                    return Err(SyncError::RateLimit {
                        attempts: attempt + 1,
                        status: status.as_u16(),
                    });
                }
                let delay = self.policy.delay_for(attempt);
                tracing::warn!(
                    "rate limited ({}), retrying in {}ms",
                    status.as_u16(),
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Transfer {
                status: status.as_u16(),
                body,
            });
        }
    }

    /// [`send`](Self::send) and decode the JSON body.
    pub async fn send_json<T, F>(&self, build: F) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let resp = self.send(build).await?;
        Ok(resp.json::<T>().await?)
    }
}
