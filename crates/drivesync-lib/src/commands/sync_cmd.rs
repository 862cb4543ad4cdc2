//! Sync commands: now, subject, status, watch.

use std::time::Duration;

use clap::{Arg, ArgMatches, Command};
use tokio_stream::StreamExt;

use crate::cli::{wants_json, CommandBuilder, CommandCategory, CommandMeta};
use crate::daemon::{RunSummary, TriggerOutcome};
use crate::errors::{Result, SyncError};
use crate::output;
use crate::services::ServiceRegistry;
use crate::sync::{SyncOutcome, SyncStatus};

const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub fn sync_command() -> Command {
    Command::new("sync")
        .about("Run or inspect file sync")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("now").about("Sync every subject now"))
        .subcommand(
            Command::new("subject")
                .about("Sync one subject")
                .arg(Arg::new("code").required(true).help("Subject code, e.g. EBC-ALG")),
        )
        .subcommand(Command::new("status").about("Show the last sync status"))
        .subcommand(Command::new("watch").about("Follow status changes until interrupted"))
}

pub fn sync_meta() -> CommandMeta {
    CommandBuilder::from_clap(sync_command())
        .category(CommandCategory::Sync)
        .build()
}

/// One-line description of a status, as shown by `sync watch`.
pub fn status_line(status: &SyncStatus) -> String {
    let mut line = status.phase().to_string();
    if let Some(subject) = &status.current_subject {
        line.push_str(&format!(" {}", subject));
    }
    if let Some(p) = status.progress {
        line.push_str(&format!(" {}/{}", p.current, p.total));
    }
    if let Some(err) = &status.error {
        line.push_str(&format!(" ({})", err));
    }
    line
}

fn render_status(status: &SyncStatus) {
    output::field("State", &status.phase().to_string());
    output::field("Last sync", &status.last_sync_display());
    if let Some(subject) = &status.current_subject {
        output::field("Subject", subject);
    }
    if let Some(p) = status.progress {
        output::field("Progress", &format!("{}/{}", p.current, p.total));
    }
    if let Some(err) = &status.error {
        output::field("Error", err);
    }
}

fn render_summary(summary: &RunSummary) {
    let msg = format!(
        "Synced {}/{} files across {} subjects",
        summary.files_synced, summary.files_total, summary.subjects
    );
    match &summary.error {
        Some(err) => output::warning(&format!("{} ({})", msg, err)),
        None => output::success(&msg),
    }
}

pub async fn handle_sync(matches: &ArgMatches, services: &ServiceRegistry) -> Result<()> {
    match matches.subcommand() {
        Some(("now", sub)) => match services.trigger_sync().await? {
            TriggerOutcome::NotAuthorized => {
                output::warning("Google Drive is not connected. Run `drivesync auth login`.")
            }
            TriggerOutcome::Skipped => output::warning("A sync is already running"),
            TriggerOutcome::Completed(summary) if wants_json(sub) => {
                println!("{}", serde_json::to_string_pretty(&summary)?)
            }
            TriggerOutcome::Completed(summary) => render_summary(&summary),
            TriggerOutcome::Failed { error, .. } => return Err(SyncError::Command(error)),
        },
        Some(("subject", sub)) => {
            let code = sub
                .get_one::<String>("code")
                .ok_or_else(|| SyncError::Command("missing subject code".into()))?;
            match services.sync_subject(code).await? {
                None => output::warning("Google Drive is not connected. Run `drivesync auth login`."),
                Some(SyncOutcome::Skipped) => output::warning("A sync is already running"),
                Some(SyncOutcome::Completed(report)) => {
                    if crate::logger::is_verbose() {
                        for subject in &report.subjects {
                            output::field(
                                &subject.subject_code,
                                &format!(
                                    "{} created, {} updated, {} failed",
                                    subject.created, subject.updated, subject.failed
                                ),
                            );
                        }
                    }
                    render_summary(&RunSummary::from(&report))
                }
            }
        }
        Some(("status", sub)) => {
            let status = services.get_status().await?;
            if wants_json(sub) {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                render_status(&status);
            }
        }
        Some(("watch", sub)) => {
            let json = wants_json(sub);
            // In-process changes arrive on the stream; a daemon in another
            // process is only visible through the shared state file.
            let mut updates = services.subscribe_status();
            let mut poll = tokio::time::interval(WATCH_POLL_INTERVAL);
            let mut last: Option<SyncStatus> = None;
            loop {
                let status = tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    Some(status) = updates.next() => status,
                    _ = poll.tick() => services.get_status().await?,
                };
                if last.as_ref() == Some(&status) {
                    continue;
                }
                if json {
                    println!("{}", serde_json::to_string(&status)?);
                } else {
                    println!("{}", status_line(&status));
                }
                last = Some(status);
            }
        }
        _ => return Err(SyncError::Command("unknown sync subcommand".into())),
    }
    Ok(())
}
