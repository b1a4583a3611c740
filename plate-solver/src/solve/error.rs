//! Error types for the solve client

use thiserror::Error;

/// Result type for solve client operations
pub type Result<T> = std::result::Result<T, SolveError>;

/// Errors that can occur while talking to the plate-solving service
#[derive(Error, Debug)]
pub enum SolveError {
    /// No API key configured
    #[error("No API key configured")]
    MissingCredential,

    /// Login request failed or its response could not be used
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// No cached session; an authentication attempt was started instead
    #[error("No session token available, authenticate and retry")]
    NoSession,

    /// Upload called with no image data
    #[error("Image data is empty")]
    EmptyImage,

    /// Transport-level error or non-success HTTP status
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Malformed response body
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// Key-value store read or write failed
    #[error("Store error: {0}")]
    Store(String),
}

impl From<reqwest::Error> for SolveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SolveError::DecodeFailure(e.to_string())
        } else {
            SolveError::NetworkFailure(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SolveError {
    fn from(e: serde_json::Error) -> Self {
        SolveError::DecodeFailure(e.to_string())
    }
}
