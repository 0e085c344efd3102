//! CLI-specific error types and their exit codes.

use thiserror::Error;
use toolhub_core::HubError;

#[derive(Debug, Error)]
pub enum CliError {
    /// Hub or server failure.
    #[error("{0}")]
    Hub(String),

    /// Argument parsing error.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("IO error: {0}")]
    Io(String),

    /// Settings could not be read or did not validate.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server answered but flagged the tool result as an error.
    #[error("Tool reported an error: {0}")]
    Tool(String),
}

impl CliError {
    /// Map error to an exit code.
    ///
    /// Exit codes follow sysexits.h where one fits.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Hub(_) | CliError::Tool(_) => 1,
            CliError::Arguments(_) => 2, // EX_USAGE
            CliError::Io(_) => 74,       // EX_IOERR
            CliError::Config(_) => 78,   // EX_CONFIG
        }
    }
}

impl From<HubError> for CliError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::ConfigParse { .. }
            | HubError::ConfigValidation(_)
            | HubError::NotConfigured { .. }
            | HubError::Path(_) => CliError::Config(err.to_string()),
            HubError::InvalidTimeout { .. } => CliError::Arguments(err.to_string()),
            HubError::Io(e) => CliError::Io(e.to_string()),
            other => CliError::Hub(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err.to_string())
    }
}
