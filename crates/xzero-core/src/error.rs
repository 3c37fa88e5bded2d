//! Error types for Xzero.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Timed out waiting for: {0}")]
    Timeout(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is local to one browser action (missing element,
    /// wait timeout) rather than a broken session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::ElementNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
