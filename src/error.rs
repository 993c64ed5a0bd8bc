//! Error types for the dispatcher core

use thiserror::Error;

/// Main error type for seda-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal configuration problem detected by `Dispatcher::start`
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unresolved stage key, raised only under strict stage resolution
    #[error("Invalid stage [{stage}]: {reason}")]
    InvalidStage { stage: String, reason: String },

    /// The stage controller refused or could not accept an event
    #[error("Controller error for stage [{stage}]: {reason}")]
    Controller { stage: String, reason: String },

    /// A stage handler failed while processing an event
    #[error("Handler error: {0}")]
    Handler(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl Error {
    pub fn invalid_stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidStage {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn controller(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Controller {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn handler(reason: impl Into<String>) -> Self {
        Error::Handler(reason.into())
    }
}

/// Result type alias for seda-core
pub type Result<T> = std::result::Result<T, Error>;
