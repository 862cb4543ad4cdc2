use std::path::{Path, PathBuf};

/// On-disk locations and environment overrides, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Application directory (`DRIVESYNC_HOME` or `~/.drivesync`).
    pub home_dir: PathBuf,
    /// Persisted key-value state shared by the CLI and the daemon.
    pub state_file: PathBuf,
    /// Advisory lock guarding writes to `state_file`.
    pub state_lock_file: PathBuf,
    pub client_id_override: Option<String>,
    pub client_secret_override: Option<String>,
}

impl AppPaths {
    pub fn from_env() -> Self {
        let home_dir = std::env::var("DRIVESYNC_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".drivesync")
            });

        let mut paths = Self::rooted_at(&home_dir);
        paths.client_id_override = non_empty_env("DRIVESYNC_CLIENT_ID");
        paths.client_secret_override = non_empty_env("DRIVESYNC_CLIENT_SECRET");
        paths
    }

    /// Paths under an explicit directory, without environment overrides.
    pub fn rooted_at(home_dir: &Path) -> Self {
        Self {
            home_dir: home_dir.to_path_buf(),
            state_file: home_dir.join("state.json"),
            state_lock_file: home_dir.join("state.lock"),
            client_id_override: None,
            client_secret_override: None,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
