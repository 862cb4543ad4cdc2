//! Interactive consent: send the user to the provider and wait for the redirect.
//!
//! The redirect lands on a one-route axum server bound to the redirect URI's
//! host and port. The first request on that route decides the outcome; the
//! server then shuts down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use oauth2::url::Url;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_util::task::AbortOnDropHandle;

use crate::errors::{AuthError, Result, SyncError};
use crate::output;

/// How long open browser connections may keep the listener up after the
/// callback has been answered.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Outcome of a consent prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentResult {
    Granted { code: String },
    Denied,
}

/// Shows the authorization URL to the user and returns the authorization code.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn request_code(&self, authorization_url: &str, state: &str) -> Result<ConsentResult>;
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    outcome: Arc<Mutex<Option<oneshot::Sender<Result<ConsentResult>>>>>,
}

/// Decide what a callback means; returns the page to show and the outcome.
fn evaluate(
    params: &CallbackParams,
    expected_state: &str,
) -> (StatusCode, &'static str, Result<ConsentResult>) {
    if let Some(error) = &params.error {
        tracing::info!("consent denied by provider: {}", error);
        return (
            StatusCode::OK,
            "Access was not granted. You can close this tab.",
            Ok(ConsentResult::Denied),
        );
    }

    if params.state.as_deref() != Some(expected_state) {
        return (
            StatusCode::BAD_REQUEST,
            "State mismatch",
            Err(AuthError::ExchangeFailed("state parameter mismatch".into()).into()),
        );
    }

    match params.code.as_deref().filter(|c| !c.is_empty()) {
        Some(code) => (
            StatusCode::OK,
            "Access granted. You can close this tab.",
            Ok(ConsentResult::Granted {
                code: code.to_string(),
            }),
        ),
        None => (
            StatusCode::BAD_REQUEST,
            "Missing authorization code",
            Ok(ConsentResult::Denied),
        ),
    }
}

async fn callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    let (status, message, result) = evaluate(&params, &state.expected_state);
    match state.outcome.lock().await.take() {
        Some(outcome) => {
            let _ = outcome.send(result);
        }
        None => tracing::debug!("consent callback after the outcome was decided"),
    }
    (status, page(message))
}

fn page(message: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><title>drivesync</title></head><body><p>{message}</p></body></html>"
    ))
}

/// Receives the redirect on a loopback listener at the configured redirect URI.
pub struct LoopbackConsent {
    redirect_uri: Url,
    timeout: Duration,
    open_browser: bool,
}

impl LoopbackConsent {
    pub fn new(redirect_uri: &str, timeout: Duration) -> Result<Self> {
        let redirect_uri = Url::parse(redirect_uri)
            .map_err(|e| SyncError::Config(format!("invalid redirectUri '{redirect_uri}': {e}")))?;
        Ok(Self {
            redirect_uri,
            timeout,
            open_browser: true,
        })
    }

    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Serve the redirect route on `listener` until a request on it carries
    /// a code or an error. Other paths (browsers like to ask for
    /// `/favicon.ico`) get a 404 and the wait continues.
    pub async fn wait_for_callback(
        &self,
        listener: TcpListener,
        expected_state: &str,
    ) -> Result<ConsentResult> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let state = CallbackState {
            expected_state: Arc::from(expected_state),
            outcome: Arc::new(Mutex::new(Some(outcome_tx))),
        };
        let router = Router::new()
            .route(self.redirect_uri.path(), get(callback))
            .with_state(state);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut server = AbortOnDropHandle::new(tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::debug!("consent listener failed: {}", e);
            }
        }));

        let result = outcome_rx.await.map_err(|_| {
            SyncError::OAuth2("consent listener stopped before a callback arrived".into())
        });

        let _ = stop_tx.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            tracing::debug!("closing consent listener with connections still open");
        }
        result?
    }
}

#[async_trait]
impl ConsentPrompt for LoopbackConsent {
    async fn request_code(&self, authorization_url: &str, state: &str) -> Result<ConsentResult> {
        let host = self
            .redirect_uri
            .host_str()
            .ok_or_else(|| SyncError::Config("redirectUri has no host".into()))?
            .to_string();
        let port = self
            .redirect_uri
            .port_or_known_default()
            .ok_or_else(|| SyncError::Config("redirectUri has no port".into()))?;
        let listener = TcpListener::bind((host.as_str(), port)).await?;

        output::info("Open this URL in your browser to grant access:");
        println!("{authorization_url}");
        if self.open_browser {
            open_in_browser(authorization_url);
        }

        match tokio::time::timeout(self.timeout, self.wait_for_callback(listener, state)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("no consent callback within {:?}", self.timeout);
                Ok(ConsentResult::Denied)
            }
        }
    }
}

fn open_in_browser(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let spawned = std::process::Command::new(opener)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        tracing::debug!("could not launch {}: {}", opener, e);
    }
}
