//! Session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phone::PhoneNumber;
use crate::{Error, Result};

/// Longest accepted session identifier
const MAX_SESSION_ID_LEN: usize = 64;

/// Lifecycle state of a pairing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Initializing,
    Connecting,
    AwaitingPairing,
    Reconnecting,
    Connected,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl SessionStatus {
    /// No worker runs for a session in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pairing session record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingSession {
    /// Unique session identifier
    pub id: String,
    /// Number being linked
    pub phone: PhoneNumber,
    pub status: SessionStatus,
    /// Last pairing code issued, formatted
    pub pairing_code: Option<String>,
    /// A QR code has been published
    pub qr_available: bool,
    /// Last error message
    pub error: Option<String>,
    /// Connection attempts made so far
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PairingSession {
    /// Create a new session record expiring after `ttl`
    pub fn new(id: impl Into<String>, phone: PhoneNumber, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            phone,
            status: SessionStatus::Created,
            pairing_code: None,
            qr_available: false,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Session ids double as directory names, so only `[A-Za-z0-9_-]` is allowed
pub fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::Other(format!("Invalid session id: {:?}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone() -> PhoneNumber {
        PhoneNumber::parse("+14155550123").unwrap()
    }

    #[test]
    fn test_session_creation() {
        let session = PairingSession::new("abc", phone(), chrono::Duration::minutes(30));
        assert_eq!(session.id, "abc");
        assert_eq!(session.status, SessionStatus::Created);
        assert!(session.pairing_code.is_none());
        assert_eq!(session.expires_at - session.created_at, chrono::Duration::minutes(30));
    }

    #[test]
    fn test_is_expired() {
        let session = PairingSession::new("abc", phone(), chrono::Duration::seconds(10));
        assert!(!session.is_expired(session.created_at));
        assert!(session.is_expired(session.created_at + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_status_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::AwaitingPairing.is_terminal());
        assert!(!SessionStatus::Connected.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::AwaitingPairing).unwrap();
        assert_eq!(json, r#""awaiting_pairing""#);
        assert_eq!(SessionStatus::AwaitingPairing.to_string(), "awaiting_pairing");
    }

    #[test]
    fn test_record_serialization() {
        let session = PairingSession::new("abc", phone(), chrono::Duration::minutes(1));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["phone"], "+14155550123");
        assert_eq!(json["status"], "created");
        assert_eq!(json["qrAvailable"], false);
        assert!(json.get("expiresAt").is_some());
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("0b6e-4f_x").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id(&"a".repeat(65)).is_err());
    }
}
