pub mod auth_cmd;
pub mod config_cmd;
pub mod daemon;
pub mod sync_cmd;
pub mod version;

use clap::ArgMatches;

use crate::cli::CommandRegistry;
use crate::errors::{Result, SyncError};
use crate::services::ServiceRegistry;

/// Register every drivesync subcommand.
pub fn register_commands(registry: &mut CommandRegistry) -> Result<()> {
    registry.register(version::version_meta())?;
    registry.register(config_cmd::config_meta())?;
    registry.register(auth_cmd::auth_meta())?;
    registry.register(sync_cmd::sync_meta())?;
    registry.register(daemon::daemon_meta())?;
    Ok(())
}

/// Commands that work without building the sync services.
pub fn is_standalone(name: &str) -> bool {
    name == "version"
}

/// Dispatch a parsed subcommand to its handler.
pub async fn dispatch_command(
    name: &str,
    matches: &ArgMatches,
    services: &ServiceRegistry,
) -> Result<()> {
    match name {
        "version" => version::handle_version(matches),
        "config" => {
            config_cmd::handle_config(matches, &services.config_manager, services.config()).await?
        }
        "auth" => auth_cmd::handle_auth(matches, services).await?,
        "sync" => sync_cmd::handle_sync(matches, services).await?,
        "daemon" => daemon::handle_daemon(matches, services).await?,
        other => return Err(SyncError::Command(format!("unknown command: {other}"))),
    }
    Ok(())
}
