//! Error types for the backend transport

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Backend transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request could not be sent or the body could not be read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {detail}")]
    Backend { status: u16, detail: String },

    /// Configured base URL is unusable
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// Session manager error
    #[error("Session manager error: {0}")]
    Core(#[from] camwall_core::Error),
}

impl Error {
    /// Whether the backend rejected the request (as opposed to being unreachable)
    pub fn is_backend_rejection(&self) -> bool {
        matches!(self, Error::Backend { .. })
    }
}
