use clap::{App, Arg, SubCommand};
use std::error::Error;

mod commands;
mod error;

use commands::*;
use error::CliError;

fn config_arg() -> Arg<'static> {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Path to the configuration file (.toml, .yaml or .json)")
        .required(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches = App::new("tradewatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Trading system monitoring and alerting")
        .subcommand(
            SubCommand::with_name("run")
                .about("Start monitoring and the web console until Ctrl-C")
                .arg(config_arg()),
        )
        .subcommand(
            SubCommand::with_name("check")
                .about("Run one probe cycle and print component health")
                .arg(config_arg()),
        )
        .subcommand(
            SubCommand::with_name("validate")
                .about("Validate a configuration file")
                .arg(config_arg()),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("run", sub_matches)) => handle_run_command(sub_matches).await,
        Some(("check", sub_matches)) => handle_check_command(sub_matches).await,
        Some(("validate", sub_matches)) => handle_validate_command(sub_matches).await,
        Some((cmd, _)) => Err(CliError::UnknownCommand(cmd.to_string())),
        None => Err(CliError::NoCommand),
    };

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
