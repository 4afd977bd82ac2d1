//! Per-connection state
//!
//! One WebSocket connection may follow several pairing sessions; each gets a
//! forwarding task that relays the session's events to this client.

use std::collections::HashMap;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use wp_core::SessionEvent;

use crate::message::ServerMessage;
use crate::{Result, WsError};

/// WebSocket connection state
pub struct WsConnection {
    /// Unique connection ID, for logs
    pub connection_id: String,
    /// Channel to send messages to this WebSocket client
    tx: mpsc::UnboundedSender<String>,
    /// Forwarding task per subscribed session
    forwards: HashMap<String, JoinHandle<()>>,
}

impl WsConnection {
    pub fn new(connection_id: String, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            connection_id,
            tx,
            forwards: HashMap::new(),
        }
    }

    /// Send a message to this client
    pub fn send(&self, message: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.tx
            .send(text)
            .map_err(|e| WsError::ChannelSend(e.to_string()))
    }

    /// Relay a session's events until it finishes
    ///
    /// Replaces any previous subscription to the same session.
    pub fn subscribe(&mut self, session_id: &str, events: broadcast::Receiver<SessionEvent>) {
        let task = tokio::spawn(forward_events(
            session_id.to_string(),
            events,
            self.tx.clone(),
        ));
        if let Some(previous) = self.forwards.insert(session_id.to_string(), task) {
            previous.abort();
        }
        debug!(
            "Connection {} subscribed to session {}",
            self.connection_id, session_id
        );
    }

    pub fn unsubscribe(&mut self, session_id: &str) -> bool {
        match self.forwards.remove(session_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.forwards
            .get(session_id)
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop every forwarding task
    pub fn close(&mut self) {
        for (_, task) in self.forwards.drain() {
            task.abort();
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn forward_events(
    session_id: String,
    mut events: broadcast::Receiver<SessionEvent>,
    tx: mpsc::UnboundedSender<String>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let terminal = event.is_terminal();
                let text = match serde_json::to_string(&ServerMessage::from(event)) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode event for {}: {}", session_id, e);
                        continue;
                    }
                };
                if tx.send(text).is_err() || terminal {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Client lagged {} events behind session {}", skipped, session_id);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Stopped forwarding session {}", session_id);
}
