//! CLI subcommand implementations.

pub mod export;
pub mod import;
pub mod start;
pub mod status;

use spyglass_core::CoreError;

/// A command failure, split by exit code.
#[derive(Debug)]
pub enum CliError {
    /// Bad configuration: missing schema, malformed expression. Exit 2.
    Config(String),
    /// Everything else. Exit 1.
    Runtime(String),
}

impl From<CoreError> for CliError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Parse(_) => CliError::Config(e.to_string()),
            other => CliError::Runtime(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Runtime(e.to_string())
    }
}

pub type CliResult = Result<(), CliError>;
