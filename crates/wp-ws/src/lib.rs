//! wp-ws: WebSocket push channel for wp-gateway
//!
//! Browser clients start pairing and receive session events in real time.
//! Built on axum's WebSocket support.

pub mod error;
pub mod handler;
pub mod message;
pub mod server;
pub mod session;

pub use error::{Result, WsError};
pub use handler::websocket_handler;
pub use message::{ClientMessage, ControlMessage, ServerMessage};
pub use server::{WsState, ws_router};
pub use session::WsConnection;
