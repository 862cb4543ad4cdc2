//! `daemon` command: run the periodic sync in the foreground until SIGINT or SIGTERM.

use clap::{Arg, ArgMatches, Command};

use crate::cli::{CommandBuilder, CommandCategory, CommandMeta};
use crate::errors::Result;
use crate::services::ServiceRegistry;
use crate::signal::ShutdownSignal;

pub fn daemon_command() -> Command {
    Command::new("daemon")
        .about("Run the background sync scheduler")
        .arg(
            Arg::new("sync-on-start")
                .long("sync-on-start")
                .action(clap::ArgAction::SetTrue)
                .help("Trigger one sync immediately instead of waiting a full interval"),
        )
}

pub fn daemon_meta() -> CommandMeta {
    CommandBuilder::from_clap(daemon_command())
        .category(CommandCategory::System)
        .build()
}

pub async fn handle_daemon(matches: &ArgMatches, services: &ServiceRegistry) -> Result<()> {
    let signal = ShutdownSignal::new();
    let listener = signal.spawn();

    if matches.get_flag("sync-on-start") {
        let outcome = services.trigger_sync().await?;
        tracing::info!("startup sync: {:?}", outcome);
    }

    tracing::info!(
        "daemon running, interval {} min",
        services.scheduler().interval().as_secs() / 60
    );
    services.run_daemon(signal.token()).await;

    signal.token().cancel();
    let _ = listener.await;
    Ok(())
}
