//! Account commands: login, logout, status.

use clap::{ArgMatches, Command};

use crate::cli::{wants_json, CommandBuilder, CommandCategory, CommandMeta};
use crate::errors::{Result, SyncError};
use crate::output;
use crate::services::{ConnectionStatus, ServiceRegistry};

pub fn auth_command() -> Command {
    Command::new("auth")
        .about("Connect or disconnect Google Drive")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("login")
                .about("Sign in and set up the sync folder")
                .arg(
                    clap::Arg::new("refresh-only")
                        .long("refresh-only")
                        .action(clap::ArgAction::SetTrue)
                        .help("Only reuse or refresh a stored credential; never prompt"),
                ),
        )
        .subcommand(Command::new("logout").about("Revoke access and forget the sync folder"))
        .subcommand(Command::new("status").about("Show connection status"))
}

pub fn auth_meta() -> CommandMeta {
    CommandBuilder::from_clap(auth_command())
        .category(CommandCategory::Account)
        .build()
}

pub fn render_connection(status: &ConnectionStatus) {
    let connection = if status.is_authenticated && status.is_authorized {
        "connected"
    } else if status.is_authenticated {
        "signed in, sync folder not set up"
    } else {
        "not connected"
    };
    output::field("Google Drive", connection);
    output::field(
        "Account",
        status.account_email.as_deref().unwrap_or("unknown"),
    );
    if let Some(folder) = &status.root_folder_name {
        output::field("Sync folder", folder);
    }
}

pub async fn handle_auth(matches: &ArgMatches, services: &ServiceRegistry) -> Result<()> {
    match matches.subcommand() {
        Some(("login", sub)) => {
            let interactive = !sub.get_flag("refresh-only");
            let credential = services.authenticate(interactive).await?;
            match credential.account_email {
                Some(email) => output::success(&format!("Signed in as {}", email)),
                None => output::success("Signed in"),
            }
        }
        Some(("logout", _)) => {
            services.sign_out().await?;
            output::success("Disconnected from Google Drive");
        }
        Some(("status", sub)) => {
            let status = services.connection_status().await?;
            if wants_json(sub) {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                render_connection(&status);
            }
        }
        _ => return Err(SyncError::Command("unknown auth subcommand".into())),
    }
    Ok(())
}
