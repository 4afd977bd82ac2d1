//! WebSocket connection handler
//!
//! Handles WebSocket connections and message routing.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use wp_core::Error as CoreError;

use crate::Result;
use crate::message::{ClientMessage, ServerMessage};
use crate::server::WsState;
use crate::session::WsConnection;

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle established WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!("New WebSocket connection: {}", connection_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut connection = WsConnection::new(connection_id.clone(), tx);

    // Task to send messages to client
    let send_id = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
        debug!("Send task ended for connection: {}", send_id);
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                if let Err(e) = handle_client_message(text.as_str(), &mut connection, &state).await
                {
                    debug!("Rejected client message on {}: {}", connection_id, e);
                    if connection.send(&ServerMessage::error(e.to_string())).is_err() {
                        break;
                    }
                }
            }
            Ok(WsMessage::Close(_)) => {
                info!("Client closed connection: {}", connection_id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Sessions keep running; the client can resubscribe after reconnecting
    connection.close();
    send_task.abort();
    info!("WebSocket connection closed: {}", connection_id);
}

/// Handle incoming client message
async fn handle_client_message(
    text: &str,
    connection: &mut WsConnection,
    state: &WsState,
) -> Result<()> {
    let msg: ClientMessage = serde_json::from_str(text)?;

    debug!("Received message: {:?}", msg);

    match msg {
        ClientMessage::StartPairing {
            session_id,
            phone_number,
        } => {
            if let Some(phone) = phone_number {
                match state
                    .service
                    .create_session_with_id(&session_id, &phone)
                    .await
                {
                    Ok(_) | Err(CoreError::SessionExists(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            subscribe(connection, state, &session_id).await?;
            state.service.start_pairing(&session_id).await?;
        }
        ClientMessage::Subscribe { session_id } => {
            subscribe(connection, state, &session_id).await?;
        }
        ClientMessage::Cancel { session_id } => {
            connection.unsubscribe(&session_id);
            let session = state.service.cleanup(&session_id).await?;
            connection.send(&ServerMessage::session_info(session))?;
        }
        ClientMessage::Ping => {
            connection.send(&ServerMessage::pong())?;
        }
    }

    Ok(())
}

/// Follow a session and send its current snapshot
async fn subscribe(connection: &mut WsConnection, state: &WsState, session_id: &str) -> Result<()> {
    let sessions = state.service.sessions();

    // Subscribe first so nothing published after the snapshot is missed
    let events = sessions.subscribe(session_id).await?;
    let session = sessions
        .get(session_id)
        .await
        .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;

    // A finished session publishes nothing more
    if !session.status.is_terminal() {
        connection.subscribe(session_id, events);
    }
    connection.send(&ServerMessage::session_info(session))?;

    Ok(())
}
