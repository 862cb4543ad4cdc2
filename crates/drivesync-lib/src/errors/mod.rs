use std::path::PathBuf;
use thiserror::Error;

/// Authentication failures surfaced by the credential layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("not authenticated; interactive sign-in required")]
    NotAuthenticated,

    #[error("consent was cancelled")]
    Cancelled,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("access token rejected again after refresh")]
    ExpiredBeyondRecovery,

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Rate limited ({status}) after {attempts} attempts")]
    RateLimit { attempts: u32, status: u16 },

    #[error("Transfer error ({status}): {body}")]
    Transfer { status: u16, body: String },

    #[error("Folder '{0}' could not be resolved")]
    FolderUnavailable(String),

    #[error("{failed} of {total} items failed to sync")]
    PartialFailure { failed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lock conflict: {path}")]
    LockConflict { path: PathBuf },

    #[error("Store error: {0}")]
    Store(String),

    #[error("OAuth2 error: {0}")]
    OAuth2(String),

    #[error("Execution context error: {0}")]
    Bridge(String),

    #[error("Command error: {0}")]
    Command(String),
}

impl SyncError {
    /// True for failures that need the user to sign in again.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Logs a fatal error and exits the process with code 1.
pub fn handle_fatal(err: SyncError) -> ! {
    tracing::error!("Fatal error: {}", err);
    std::process::exit(1)
}

/// Maps a `SyncError` to user-friendly CLI output with actionable suggestions.
pub fn handle_command_error(err: &SyncError) {
    use crate::output;

    match err {
        SyncError::Auth(AuthError::Cancelled) => {
            output::warning("Sign-in was cancelled.");
        }
        SyncError::Auth(e) => {
            output::error(&format!("Authentication error: {}", e));
            output::info("Run `drivesync auth login` to authenticate.");
        }
        SyncError::OAuth2(msg) => {
            output::error(&format!("OAuth2 error: {}", msg));
            output::info("Check clientId / redirectUri with `drivesync config show`.");
        }
        SyncError::Config(msg) => {
            output::error(&format!("Configuration error: {}", msg));
            output::info("Run `drivesync auth login` to finish setup.");
        }
        SyncError::RateLimit { .. } => {
            output::error(&format!("{}", err));
            output::info("The storage provider is throttling requests. Try again later.");
        }
        SyncError::Http(e) => {
            output::error(&format!("Network error: {}", e));
            output::info("Check your internet connection.");
        }
        SyncError::LockConflict { path } => {
            output::error(&format!("Lock conflict: {}", path.display()));
            output::info("Another drivesync process is writing state. Wait and try again.");
        }
        _ => {
            output::error(&format!("{}", err));
        }
    }
}
