use std::error::Error;
use std::fmt;
use tradewatch::MonitorError;

#[derive(Debug)]
pub enum CliError {
    NoCommand,
    UnknownCommand(String),
    ParseError { field: String, message: String },
    InvalidConfiguration(Vec<String>),
    Monitor(MonitorError),
    Unhealthy(String),
    IoError(std::io::Error),
    LoggingError(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::NoCommand => write!(f, "No command specified. Use --help to see available commands"),
            CliError::UnknownCommand(cmd) => write!(f, "Unknown command: {}", cmd),
            CliError::ParseError { field, message } => write!(f, "Parse error for {}: {}", field, message),
            CliError::InvalidConfiguration(errors) => {
                write!(f, "Configuration is invalid:")?;
                for error in errors {
                    write!(f, "\n  - {}", error)?;
                }
                Ok(())
            }
            CliError::Monitor(e) => write!(f, "{}", e),
            CliError::Unhealthy(status) => write!(f, "System is {}", status),
            CliError::IoError(e) => write!(f, "IO error: {}", e),
            CliError::LoggingError(msg) => write!(f, "Failed to initialise logging: {}", msg),
        }
    }
}

impl Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::IoError(err)
    }
}

impl From<MonitorError> for CliError {
    fn from(err: MonitorError) -> Self {
        CliError::Monitor(err)
    }
}

pub type CliResult<T> = Result<T, CliError>;
