//! WebSocket router
//!
//! The `/ws` route is merged into the HTTP router by wp-api.

use std::sync::Arc;

use axum::{Router, routing::get};

use wp_link::PairingService;

use crate::handler::websocket_handler;

/// Shared WebSocket server state
#[derive(Clone)]
pub struct WsState {
    pub service: PairingService,
}

/// Router serving the push channel at `/ws`
pub fn ws_router(service: PairingService) -> Router {
    let state = Arc::new(WsState { service });

    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}
