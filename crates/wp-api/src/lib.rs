//! wp-api: HTTP API for wp-gateway
//!
//! Session endpoints, the one-shot `/pair` endpoint, static files and the
//! WebSocket push channel, assembled into one axum router.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{AppState, build_router, start_server};
