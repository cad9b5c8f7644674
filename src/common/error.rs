//! Error types for the merge and speed-test pipelines

use std::io;
use thiserror::Error;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Core process error: {0}")]
    Process(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Error::Network(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn process<S: Into<String>>(msg: S) -> Self {
        Error::Process(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Process exit code for this error.
    ///
    /// A core process that failed to start or never became ready exits
    /// with 99 so CI can tell it apart from plain configuration errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Process(_) | Error::Timeout(_) => 99,
            _ => 1,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;
