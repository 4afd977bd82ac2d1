//! Error types for wp-core

use thiserror::Error;

/// Main error type for wp-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Messaging link error: {0}")]
    Link(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for wp-core
pub type Result<T> = std::result::Result<T, Error>;
