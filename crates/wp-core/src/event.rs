//! Push events relayed to the browser client

use serde::{Deserialize, Serialize};

/// Event published on a session's push channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Human-readable progress message
    Status { message: String },

    /// Formatted pairing code (`ABCD-1234`)
    PairingCode { code: String },

    /// QR code as a PNG data URL
    QrCode {
        #[serde(rename = "qrCode")]
        qr_code: String,
    },

    /// Device linked, credentials persisted
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Terminal failure
    Error { message: String },

    /// Session timed out
    SessionExpired,
}

impl SessionEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether no further events follow on this session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Connected { .. } | Self::Error { .. } | Self::SessionExpired
        )
    }
}
