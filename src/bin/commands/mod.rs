pub mod check;
pub mod run;
pub mod validate;

pub use check::handle_check_command;
pub use run::handle_run_command;
pub use validate::handle_validate_command;

use crate::error::{CliError, CliResult};
use clap::ArgMatches;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use tradewatch::config::{LoggingConfig, MonitorConfig};

/// Read `--config`, then layer `TRADEWATCH_*` overrides on top
pub fn load_config(matches: &ArgMatches) -> CliResult<MonitorConfig> {
    let path = matches.value_of("config").ok_or_else(|| CliError::ParseError {
        field: "config".to_string(),
        message: "Configuration file not specified. Please use the --config option.".to_string(),
    })?;

    let mut config = MonitorConfig::load_from_path(Path::new(path))?;
    for key in config.apply_env_overrides() {
        println!("🔧 {} overridden from environment", key);
    }
    Ok(config)
}

pub fn init_logging(config: &LoggingConfig) -> CliResult<()> {
    let level = LevelFilter::from_str(&config.level).map_err(|_| CliError::ParseError {
        field: "logging.level".to_string(),
        message: format!("Unknown log level: {}", config.level),
    })?;

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = &config.file_path {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }

    CombinedLogger::init(loggers).map_err(|e| CliError::LoggingError(e.to_string()))
}
