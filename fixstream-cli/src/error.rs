//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use fixstream::config::ConfigError;
use fixstream::engine::EngineError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration could not be loaded or was invalid
    Config(ConfigError),
    /// An engine command failed
    Engine(EngineError),
    /// Failed to create the capture output file
    FileWrite {
        path: PathBuf,
        error: std::io::Error,
    },
    /// Failed to install the Ctrl-C handler
    Signal(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Engine(EngineError::NoDevice) => {
                eprintln!();
                eprintln!("Pass a device with --file <path> or --tcp <host:port>.");
            }
            CliError::Config(ConfigError::ReadError { .. }) => {
                eprintln!();
                eprintln!("Check the file, or run 'fixstream config' to see the defaults.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Engine(e) => write!(f, "Engine error: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path.display(), error)
            }
            CliError::Signal(msg) => write!(f, "Failed to install signal handler: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Engine(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}
