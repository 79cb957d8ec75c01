//! Error types for the camwall session manager

use thiserror::Error;

use crate::engine::EngineError;
use crate::resolver::ResolveError;

/// Result type alias for camwall core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the camwall core
#[derive(Debug, Error)]
pub enum Error {
    /// Stream descriptor could not be resolved for a camera
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Playback engine error surfaced outside of a session
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown quality tier name
    #[error("Invalid quality tier: {0}. Expected one of: high, medium, low")]
    InvalidQuality(String),

    /// The supervisor task is gone (shut down or panicked)
    #[error("Session supervisor is not running")]
    SupervisorClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::SupervisorClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::SupervisorClosed
    }
}
