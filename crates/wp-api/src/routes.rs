//! Route definitions
//!
//! Defines all HTTP API endpoints.

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::handlers::{cleanup_session, get_session, list_sessions, pair, start_session};
use crate::middleware::rate_limit::rate_limit_middleware;
use crate::server::AppState;

/// Create the API router
///
/// `/health` is mounted separately so it stays outside authentication.
pub fn routes(state: AppState) -> Router {
    // Session creation is rate limited per client
    let creation = Router::new()
        .route("/api/start-session", post(start_session))
        .route("/pair", post(pair))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        // Session management
        .route("/api/session/{session_id}", get(get_session))
        .route("/api/sessions", get(list_sessions))
        .route("/api/cleanup/{session_id}", delete(cleanup_session))
        .merge(creation)
        .with_state(state)
}
