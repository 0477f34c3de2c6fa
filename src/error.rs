//! Unified error types for Shipwright

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Shipwright operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Host file errors
    #[error("Failed to read '{path}': {source}")]
    StoreUnreadable { path: PathBuf, source: io::Error },

    #[error("Failed to write '{path}': {source}")]
    StoreUnwritable { path: PathBuf, source: io::Error },

    #[error("Anchor rule '{anchor}' not found in {path}")]
    AnchorNotFound { anchor: String, path: PathBuf },

    #[error("Directive '{directive}' not found in {path}")]
    DirectiveNotFound { directive: String, path: PathBuf },

    // Allocation errors
    #[error("Resource exhausted: {0}")]
    ExhaustedResource(String),

    // Jail errors
    #[error("Jail '{0}' is already registered")]
    NameAlreadyExists(String),

    // Command errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command '{command}' timed out after {secs} seconds")]
    CommandTimeout { command: String, secs: u64 },

    #[error("Provisioning cancelled")]
    Cancelled,

    // Workflow errors
    #[error("Provisioning failed at stage '{stage}': {source}")]
    StageFailed { stage: String, source: Box<Error> },
}

/// Result type alias for Shipwright operations
pub type Result<T> = std::result::Result<T, Error>;
