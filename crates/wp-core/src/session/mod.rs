//! Pairing session management
//!
//! Sessions live only in memory; nothing here survives a restart.

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{PairingSession, SessionStatus, validate_session_id};
