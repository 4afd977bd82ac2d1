//! Error types for wp-ws

use thiserror::Error;

/// WebSocket error type
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] wp_core::Error),

    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

/// Result type alias for wp-ws
pub type Result<T> = std::result::Result<T, WsError>;
