//! Pairing worker
//!
//! Drives one session: starts a library client, requests the pairing code,
//! relays connection events to subscribers, persists credential updates and
//! finally delivers the credentials to the paired number. An unexpected
//! disconnect restarts the client; a logout ends the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use zeroize::Zeroizing;

use wp_core::{
    Config, CredentialStore, PhoneNumber, Result, SessionEvent, SessionManager, SessionStatus,
    format_pairing_code,
};

use crate::client::{DisconnectReason, LinkClient, LinkConnection, LinkConnector, LinkEvent};
use crate::qr::{render_qr_data_url, render_qr_terminal};

/// Worker tuning knobs
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Wait before asking for the pairing code
    pub pairing_delay: Duration,
    /// Restarts allowed after an unexpected disconnect
    pub max_reconnects: u32,
    /// Message the credentials to the paired number
    pub send_credentials: bool,
    /// Unlink the device once credentials are delivered
    pub logout_after_delivery: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            pairing_delay: Duration::from_secs(2),
            max_reconnects: 1,
            send_credentials: true,
            logout_after_delivery: false,
        }
    }
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            pairing_delay: config.session.pairing_delay(),
            max_reconnects: config.session.max_reconnects,
            send_credentials: config.delivery.send_credentials,
            logout_after_delivery: config.delivery.logout_after_delivery,
        }
    }
}

/// Text sent to the user carrying their credentials
pub fn credentials_message(creds: &str) -> Zeroizing<String> {
    Zeroizing::new(format!("✅ *Your WhatsApp Session*\n\n```{}```", creds))
}

/// How one client run ended
#[derive(Debug)]
enum Attempt {
    Completed,
    Disconnected(DisconnectReason),
    Failed(String),
}

/// Progress carried across client restarts
#[derive(Debug, Default)]
struct Progress {
    code_issued: bool,
    registered: bool,
}

/// Drives a single pairing session
pub struct PairingWorker {
    session_id: String,
    phone: PhoneNumber,
    sessions: SessionManager,
    store: CredentialStore,
    connector: Arc<dyn LinkConnector>,
    settings: WorkerSettings,
}

impl PairingWorker {
    pub fn new(
        session_id: impl Into<String>,
        phone: PhoneNumber,
        sessions: SessionManager,
        store: CredentialStore,
        connector: Arc<dyn LinkConnector>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            phone,
            sessions,
            store,
            connector,
            settings,
        }
    }

    /// Run the session to a terminal status
    pub async fn run(self) -> SessionStatus {
        let mut progress = Progress::default();
        let mut reconnects = 0u32;
        let mut free_restart_used = false;

        loop {
            let attempts = self
                .sessions
                .update(&self.session_id, |record| record.attempts += 1)
                .await
                .map(|record| record.attempts)
                .unwrap_or_default();
            debug!("Session {} attempt {}", self.session_id, attempts);

            let outcome = match self.attempt(&mut progress).await {
                Ok(outcome) => outcome,
                Err(e) => Attempt::Failed(e.to_string()),
            };

            match outcome {
                Attempt::Completed => return SessionStatus::Completed,
                Attempt::Failed(message) => return self.fail(message).await,
                Attempt::Disconnected(reason) if reason.is_terminal() => {
                    return self
                        .fail(format!("WhatsApp session ended: {}", reason))
                        .await;
                }
                Attempt::Disconnected(reason) => {
                    // The library always asks for one restart right after pairing
                    let free = reason == DisconnectReason::RestartRequired && !free_restart_used;
                    if free {
                        free_restart_used = true;
                    } else if reconnects < self.settings.max_reconnects {
                        reconnects += 1;
                    } else {
                        return self
                            .fail(format!("Connection closed: {}", reason))
                            .await;
                    }

                    info!("Session {} reconnecting ({})", self.session_id, reason);
                    self.status(
                        SessionStatus::Reconnecting,
                        format!("Connection closed ({}), reconnecting...", reason),
                    )
                    .await;
                }
            }
        }
    }

    async fn attempt(&self, progress: &mut Progress) -> Result<Attempt> {
        let auth_dir = self.store.ensure_session_dir(&self.session_id).await?;

        self.status(SessionStatus::Initializing, "Initializing WhatsApp client...")
            .await;

        let LinkConnection { client, mut events } = self.connector.connect(&auth_dir).await?;
        let outcome = self.drive(client.as_ref(), &mut events, progress).await;
        client.shutdown().await;

        outcome
    }

    async fn drive(
        &self,
        client: &dyn LinkClient,
        events: &mut mpsc::Receiver<LinkEvent>,
        progress: &mut Progress,
    ) -> Result<Attempt> {
        let mut want_code = !progress.code_issued && !progress.registered;
        let pairing_timer = tokio::time::sleep(self.settings.pairing_delay);
        tokio::pin!(pairing_timer);

        loop {
            tokio::select! {
                _ = &mut pairing_timer, if want_code => {
                    want_code = false;
                    self.issue_pairing_code(client).await?;
                    progress.code_issued = true;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return Ok(Attempt::Disconnected(DisconnectReason::ConnectionLost));
                    };

                    match event {
                        LinkEvent::Connecting => {
                            self.status(SessionStatus::Connecting, "Connecting to WhatsApp...")
                                .await;
                        }
                        LinkEvent::Qr(payload) => self.publish_qr(&payload).await,
                        LinkEvent::CredsUpdate { creds, registered } => {
                            self.store.write_creds(&self.session_id, &creds).await?;
                            progress.registered |= registered;
                        }
                        LinkEvent::Open => {
                            self.deliver(client).await?;
                            return Ok(Attempt::Completed);
                        }
                        LinkEvent::Close { reason } => {
                            return Ok(Attempt::Disconnected(reason));
                        }
                    }
                }
            }
        }
    }

    async fn issue_pairing_code(&self, client: &dyn LinkClient) -> Result<()> {
        let raw = client.request_pairing_code(&self.phone).await?;
        let code = format_pairing_code(&raw);
        info!("Pairing code issued for session {}", self.session_id);

        let _ = self
            .sessions
            .set_status(&self.session_id, SessionStatus::AwaitingPairing)
            .await;
        self.publish(SessionEvent::PairingCode { code }).await;
        self.publish(SessionEvent::status(
            "Enter the pairing code in WhatsApp > Linked Devices > Link a Device",
        ))
        .await;

        Ok(())
    }

    async fn publish_qr(&self, payload: &str) {
        if tracing::enabled!(Level::DEBUG) {
            if let Ok(text) = render_qr_terminal(payload) {
                debug!("QR for session {}:\n{}", self.session_id, text);
            }
        }

        match render_qr_data_url(payload) {
            Ok(qr_code) => self.publish(SessionEvent::QrCode { qr_code }).await,
            Err(e) => warn!("Failed to render QR for session {}: {}", self.session_id, e),
        }
    }

    async fn deliver(&self, client: &dyn LinkClient) -> Result<()> {
        self.status(SessionStatus::Connected, "WhatsApp connected, saving session...")
            .await;

        let creds = self.store.read_creds(&self.session_id).await?;
        if self.settings.send_credentials {
            let message = credentials_message(&creds);
            client.send_text(&self.phone.jid(), &message).await?;
            info!("Credentials sent to {}", self.phone);
        }

        if !self.store.mark_completed(&self.session_id).await? {
            debug!("Session {} was already completed", self.session_id);
        }

        let _ = self
            .sessions
            .set_status(&self.session_id, SessionStatus::Completed)
            .await;
        self.publish(SessionEvent::Connected {
            session_id: self.session_id.clone(),
        })
        .await;

        if self.settings.logout_after_delivery {
            if let Err(e) = client.logout().await {
                warn!("Logout after delivery failed for {}: {}", self.session_id, e);
            }
        }

        Ok(())
    }

    async fn fail(&self, message: String) -> SessionStatus {
        error!("Pairing session {} failed: {}", self.session_id, message);
        let _ = self
            .sessions
            .set_status(&self.session_id, SessionStatus::Failed)
            .await;
        self.publish(SessionEvent::error(message)).await;
        SessionStatus::Failed
    }

    async fn status(&self, status: SessionStatus, message: impl Into<String>) {
        let _ = self.sessions.set_status(&self.session_id, status).await;
        self.publish(SessionEvent::status(message)).await;
    }

    async fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.sessions.publish(&self.session_id, event).await {
            debug!("Dropping event for {}: {}", self.session_id, e);
        }
    }
}
