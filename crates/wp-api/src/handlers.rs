//! HTTP API handlers
//!
//! Request handlers for pairing-session management.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use wp_core::{PairingSession, SessionStatus};

use crate::error::{ApiError, Result};
use crate::server::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// Start-session request payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub phone_number: Option<String>,
}

/// Start-session response payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
}

/// One-shot pairing request payload
#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub number: Option<String>,
}

/// One-shot pairing response payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    /// Formatted pairing code
    pub code: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::InvalidRequest(e.body_text()))
}

// ============================================================================
// Handler functions
// ============================================================================

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Register a pairing session; the client starts it over the WebSocket
pub async fn start_session(
    State(state): State<AppState>,
    payload: std::result::Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<Json<StartSessionResponse>> {
    let phone = body(payload)?
        .phone_number
        .ok_or_else(|| ApiError::InvalidRequest("Phone number is required".into()))?;

    let session = state.service.create_session(&phone).await?;

    Ok(Json(StartSessionResponse {
        session_id: session.id,
        status: session.status,
        expires_at: session.expires_at,
    }))
}

/// Get one session
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<PairingSession>> {
    debug!("Session info request: {}", session_id);

    state
        .service
        .sessions()
        .get(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| wp_core::Error::SessionNotFound(session_id).into())
}

/// List all live sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<PairingSession>> {
    Json(state.service.sessions().list().await)
}

/// Cancel a session and delete its auth state
pub async fn cleanup_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    info!("Cleaning up session: {}", session_id);
    state.service.cleanup(&session_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Start a session and answer with its pairing code
pub async fn pair(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PairRequest>, JsonRejection>,
) -> Result<Json<PairResponse>> {
    let number = body(payload)?
        .number
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("Invalid number".into()))?;

    let session = state.service.start_session(&number).await?;
    let wait = state.service.config().session.pair_wait();

    match state.service.wait_for_pairing_code(&session.id, wait).await {
        Ok(code) => Ok(Json(PairResponse {
            code,
            session_id: session.id,
        })),
        Err(e) => {
            warn!("No pairing code for session {}: {}", session.id, e);
            if let Err(cleanup_err) = state.service.cleanup(&session.id).await {
                debug!("Cleanup after failed pairing: {}", cleanup_err);
            }
            Err(e.into())
        }
    }
}
