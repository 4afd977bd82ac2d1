//! Messaging client traits
//!
//! A [`LinkConnector`] produces one connected [`LinkClient`] per session
//! together with the stream of connection events the library emits.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use wp_core::{PhoneNumber, Result};

/// Connection lifecycle event emitted by the messaging library
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Socket is opening
    Connecting,
    /// Device is linked and the socket is open
    Open,
    /// Socket closed
    Close { reason: DisconnectReason },
    /// QR payload to render for the scan-based flow
    Qr(String),
    /// Auth state changed and must be persisted
    CredsUpdate { creds: JsonValue, registered: bool },
}

/// Why the library closed the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The device was unlinked from the phone (401)
    LoggedOut,
    /// The library asks for a fresh socket, normal right after pairing (515)
    RestartRequired,
    /// Connection dropped (428)
    ConnectionLost,
    /// Handshake or keepalive timed out (408)
    TimedOut,
    /// Another client took over this session (440)
    Replaced,
    Other(Option<u16>),
}

impl DisconnectReason {
    /// Map the library's numeric disconnect status
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(515) => Self::RestartRequired,
            Some(428) => Self::ConnectionLost,
            Some(408) => Self::TimedOut,
            Some(440) => Self::Replaced,
            other => Self::Other(other),
        }
    }

    /// A terminal disconnect must not be retried
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut | Self::Replaced)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::RestartRequired => write!(f, "restart required"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Replaced => write!(f, "connection replaced"),
            Self::Other(Some(code)) => write!(f, "disconnected ({})", code),
            Self::Other(None) => write!(f, "disconnected"),
        }
    }
}

/// A live messaging-library client
#[async_trait]
pub trait LinkClient: Send + Sync {
    /// Ask the library for a pairing code for `phone` (unformatted)
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String>;

    /// Send a text message to a JID
    async fn send_text(&self, jid: &str, text: &str) -> Result<()>;

    /// Unlink this device from the account
    async fn logout(&self) -> Result<()>;

    /// Release the client; never fails
    async fn shutdown(&self);
}

/// A connected client plus its event stream
pub struct LinkConnection {
    pub client: Box<dyn LinkClient>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Factory for messaging-library clients
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Start a client whose auth state lives in `auth_dir`
    async fn connect(&self, auth_dir: &Path) -> Result<LinkConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_mapping() {
        assert_eq!(
            DisconnectReason::from_status_code(Some(401)),
            DisconnectReason::LoggedOut
        );
        assert_eq!(
            DisconnectReason::from_status_code(Some(515)),
            DisconnectReason::RestartRequired
        );
        assert_eq!(
            DisconnectReason::from_status_code(Some(500)),
            DisconnectReason::Other(Some(500))
        );
        assert_eq!(
            DisconnectReason::from_status_code(None),
            DisconnectReason::Other(None)
        );
    }

    #[test]
    fn test_terminal_reasons() {
        assert!(DisconnectReason::LoggedOut.is_terminal());
        assert!(DisconnectReason::Replaced.is_terminal());
        assert!(!DisconnectReason::RestartRequired.is_terminal());
        assert!(!DisconnectReason::ConnectionLost.is_terminal());
        assert!(!DisconnectReason::Other(None).is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(DisconnectReason::LoggedOut.to_string(), "logged out");
        assert_eq!(DisconnectReason::Other(Some(503)).to_string(), "disconnected (503)");
    }
}
