//! Version CLI command.

use clap::{ArgMatches, Command};

use crate::cli::{wants_json, CommandBuilder, CommandCategory, CommandMeta};

pub fn version_command() -> Command {
    Command::new("version").about("Show version information")
}

pub fn version_meta() -> CommandMeta {
    CommandBuilder::from_clap(version_command())
        .category(CommandCategory::Core)
        .build()
}

pub fn handle_version(matches: &ArgMatches) {
    let version = env!("CARGO_PKG_VERSION");
    if wants_json(matches) {
        println!(
            "{}",
            serde_json::json!({ "name": "drivesync", "version": version })
        );
    } else {
        println!("drivesync version {}", version);
    }
}
