//! Domain-specific error types for cardwright

use thiserror::Error;

/// Main error type for the card composition engine
#[derive(Error, Debug)]
pub enum CardwrightError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Retrieval error: {message}")]
    Retrieval { message: String },

    #[error("Generation error: {message}")]
    Generation { message: String },

    #[error("Embedding provider error: {message}")]
    Embedding { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<anyhow::Error> for CardwrightError {
    fn from(err: anyhow::Error) -> Self {
        CardwrightError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CardwrightError {
    fn from(err: serde_json::Error) -> Self {
        CardwrightError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for CardwrightError {
    fn from(err: reqwest::Error) -> Self {
        CardwrightError::Generation {
            message: format!("HTTP request failed: {}", err),
        }
    }
}

/// Result type alias for cardwright operations
pub type Result<T> = std::result::Result<T, CardwrightError>;
