//! Error types for mongoload-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// A workload configuration problem detected at setup. Fatal: no actors
    /// are constructed and no threads are spawned.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A failure while the workload is running. Local to the actor that hit
    /// it unless the actor escalates by aborting the orchestrator.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Database error surfaced by the MongoDB driver
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidConfiguration`]
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Error::InvalidConfiguration(message.into())
    }

    /// Shorthand for an [`Error::Runtime`]
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
