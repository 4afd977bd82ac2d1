//! WebSocket message types
//!
//! Defines the JSON message format for WebSocket communication.

use serde::{Deserialize, Serialize};
use wp_core::{PairingSession, SessionEvent};

/// Message from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a session and start its worker
    ///
    /// With `phone_number` the session is created under `session_id` if it
    /// does not exist yet.
    StartPairing {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },

    /// Receive a session's events without starting it
    Subscribe { session_id: String },

    /// Stop a session and delete its auth state
    Cancel { session_id: String },

    /// Ping for keepalive
    Ping,
}

/// Message from server to client
///
/// Session events go out verbatim so the browser client sees the same
/// `pairingCode` / `qrCode` / `connected` payloads it would over HTTP polling.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Event(SessionEvent),
    Control(ControlMessage),
}

/// Connection-level replies
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Pong response
    Pong,

    /// Current session snapshot
    SessionInfo { session: PairingSession },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Event(SessionEvent::error(message))
    }

    pub fn pong() -> Self {
        Self::Control(ControlMessage::Pong)
    }

    pub fn session_info(session: PairingSession) -> Self {
        Self::Control(ControlMessage::SessionInfo { session })
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        Self::Event(event)
    }
}
