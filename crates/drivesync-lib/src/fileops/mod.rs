//! Small filesystem helpers for persisted state.

use std::path::Path;

use crate::errors::Result;

pub mod lock;

/// Write `content` to `path` atomically: write a sibling temp file, then rename.
///
/// Readers never observe a half-written file. Parent directories are created.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    tokio::fs::write(&tmp, content).await?;
    set_private_permissions(&tmp)?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Restrict a file to its owner (0o600); credentials live in these files.
///
/// On non-Unix platforms this is a no-op.
#[cfg(unix)]
fn set_private_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_private_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
