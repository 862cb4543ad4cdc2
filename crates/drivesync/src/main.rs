use drivesync_lib::cli::{create_root_command, is_verbose, CommandRegistry};
use drivesync_lib::commands::{dispatch_command, is_standalone, register_commands};
use drivesync_lib::config::AppPaths;
use drivesync_lib::errors::{handle_command_error, handle_fatal};
use drivesync_lib::services::ServiceRegistry;

fn build_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new(create_root_command());
    if let Err(e) = register_commands(&mut registry) {
        handle_fatal(e);
    }
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Step 1: Parse arguments
    let matches = build_registry().build_root().get_matches();

    // Step 2: Initialize Logger, verbose from parsed args
    let verbose = is_verbose(&matches);
    drivesync_lib::logger::init(verbose);
    drivesync_lib::logger::set_verbose(verbose);

    let Some((name, sub_matches)) = matches.subcommand() else {
        // No subcommand: short usage plus the grouped command list
        println!("Usage: drivesync [OPTIONS] <COMMAND>\n");
        print!("{}", build_registry().render_listing());
        return Ok(());
    };

    if is_standalone(name) {
        drivesync_lib::commands::version::handle_version(sub_matches);
        return Ok(());
    }

    // Step 3: Resolve paths, load config and state, wire services
    let paths = AppPaths::from_env();
    let services = match ServiceRegistry::initialize(&paths).await {
        Ok(services) => services,
        Err(e) => handle_fatal(e),
    };

    // Step 4: Dispatch
    tracing::debug!(command = name, "Executing command");
    if let Err(e) = dispatch_command(name, sub_matches, &services).await {
        handle_command_error(&e);
        std::process::exit(1);
    }
    Ok(())
}
