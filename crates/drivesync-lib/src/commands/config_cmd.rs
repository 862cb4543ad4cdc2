//! Config CLI command: show, set, reset, path.
//!
//! Named `config_cmd` to avoid clashing with the `config` module.

use clap::{Arg, ArgMatches, Command};
use serde_json::Value;

use crate::cli::{CommandBuilder, CommandCategory, CommandMeta};
use crate::config::{ConfigManager, SyncConfig};
use crate::errors::{Result, SyncError};
use crate::output;

pub fn config_command() -> Command {
    Command::new("config")
        .about("View and modify configuration")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("show").about("Print the effective configuration"))
        .subcommand(
            Command::new("set")
                .about("Set one configuration key")
                .arg(Arg::new("key").required(true).help("camelCase key, e.g. syncIntervalMinutes"))
                .arg(Arg::new("value").required(true).help("JSON value or plain string")),
        )
        .subcommand(Command::new("reset").about("Restore all defaults"))
        .subcommand(Command::new("path").about("Print the config file location"))
}

pub fn config_meta() -> CommandMeta {
    CommandBuilder::from_clap(config_command())
        .category(CommandCategory::Core)
        .build()
}

/// `value` as JSON when it parses, otherwise as a string.
pub fn parse_value(value: &str) -> Value {
    serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

/// The config with the client secret and portal cookie masked.
fn redacted(config: &SyncConfig) -> Result<Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(obj) = value.as_object_mut() {
        for key in ["clientSecret", "portalCookie"] {
            if let Some(v) = obj.get_mut(key) {
                if v.as_str().is_some_and(|s| !s.is_empty()) {
                    *v = Value::String("********".into());
                }
            }
        }
    }
    Ok(value)
}

pub async fn handle_config(
    matches: &ArgMatches,
    config_mgr: &ConfigManager,
    effective: &SyncConfig,
) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => {
            println!("{}", serde_json::to_string_pretty(&redacted(effective)?)?);
        }
        Some(("set", sub)) => {
            let key = sub
                .get_one::<String>("key")
                .ok_or_else(|| SyncError::Command("missing key".into()))?;
            let value = sub
                .get_one::<String>("value")
                .ok_or_else(|| SyncError::Command("missing value".into()))?;

            let mut updates = serde_json::Map::new();
            updates.insert(key.clone(), parse_value(value));
            config_mgr.update_config(updates).await?;
            output::success(&format!("{} updated", key));
            if let Err(e) = config_mgr.get_config().await.validate() {
                output::warning(&e.to_string());
            }
        }
        Some(("reset", _)) => {
            config_mgr.reset_to_defaults().await?;
            output::success("Configuration reset to defaults");
        }
        Some(("path", _)) => println!("{}", config_mgr.config_path().display()),
        _ => return Err(SyncError::Command("unknown config subcommand".into())),
    }
    Ok(())
}
