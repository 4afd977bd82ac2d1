//! wp-core: WhatsApp Pairing Gateway Core Library
//!
//! 設定、エラー型、電話番号の検証、ペアリングセッションの管理、
//! 認証情報のディスク永続化といったコア機能を提供します。

pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod pairing_code;
pub mod phone;
pub mod session;

pub use config::{BridgeConfig, Config, DeliveryConfig, ServerConfig, SessionConfig};
pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use event::SessionEvent;
pub use pairing_code::format_pairing_code;
pub use phone::PhoneNumber;
pub use session::{PairingSession, SessionManager, SessionStatus};
