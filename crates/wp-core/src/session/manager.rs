//! Session manager

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::event::SessionEvent;
use crate::phone::PhoneNumber;
use crate::session::{PairingSession, SessionStatus, validate_session_id};
use crate::{Error, Result};

/// Buffered events per session push channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A live map entry
struct SessionEntry {
    record: PairingSession,
    events: broadcast::Sender<SessionEvent>,
    worker: Option<AbortHandle>,
}

impl SessionEntry {
    fn new(record: PairingSession) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            record,
            events,
            worker: None,
        }
    }

    fn abort_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            handle.abort();
        }
    }
}

/// In-memory session map with expiry
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    timeout: Duration,
}

impl SessionManager {
    /// Create a manager whose sessions expire after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::days(36_500))
    }

    /// Create a session with a fresh id
    pub async fn create(&self, phone: PhoneNumber) -> PairingSession {
        let id = uuid::Uuid::new_v4().to_string();
        let record = PairingSession::new(id.clone(), phone, self.ttl());

        let mut sessions = self.sessions.write().await;
        sessions.insert(id.clone(), SessionEntry::new(record.clone()));
        info!("Created pairing session {} for {}", id, record.phone);

        record
    }

    /// Create a session with a caller-chosen id
    pub async fn create_with_id(&self, id: &str, phone: PhoneNumber) -> Result<PairingSession> {
        validate_session_id(id)?;

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            return Err(Error::SessionExists(id.to_string()));
        }

        let record = PairingSession::new(id, phone, self.ttl());
        sessions.insert(id.to_string(), SessionEntry::new(record.clone()));
        info!("Created pairing session {} for {}", id, record.phone);

        Ok(record)
    }

    /// Get a snapshot of a session record
    pub async fn get(&self, id: &str) -> Option<PairingSession> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|entry| entry.record.clone())
    }

    /// All sessions, oldest first
    pub async fn list(&self) -> Vec<PairingSession> {
        let sessions = self.sessions.read().await;
        let mut records: Vec<_> = sessions.values().map(|e| e.record.clone()).collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Get session count
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Mutate a session record in place
    pub async fn update<F>(&self, id: &str, f: F) -> Result<PairingSession>
    where
        F: FnOnce(&mut PairingSession),
    {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        f(&mut entry.record);
        entry.record.touch();

        Ok(entry.record.clone())
    }

    pub async fn set_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        self.update(id, |record| record.status = status).await?;
        debug!("Session {} -> {}", id, status);
        Ok(())
    }

    /// Publish an event to the session's subscribers
    ///
    /// The event's payload is also recorded on the session so that a client
    /// polling over HTTP sees the same state as a push subscriber.
    pub async fn publish(&self, id: &str, event: SessionEvent) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        match &event {
            SessionEvent::PairingCode { code } => entry.record.pairing_code = Some(code.clone()),
            SessionEvent::QrCode { .. } => entry.record.qr_available = true,
            SessionEvent::Error { message } => entry.record.error = Some(message.clone()),
            _ => {}
        }
        entry.record.touch();

        // No subscribers is fine; the record still carries the state
        let _ = entry.events.send(event);
        Ok(())
    }

    /// Subscribe to a session's push channel
    pub async fn subscribe(&self, id: &str) -> Result<broadcast::Receiver<SessionEvent>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|entry| entry.events.subscribe())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Attach the task driving this session
    ///
    /// If the session is already gone the task is aborted immediately.
    pub async fn attach_worker(&self, id: &str, handle: AbortHandle) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(entry) => {
                entry.abort_worker();
                entry.worker = Some(handle);
                Ok(())
            }
            None => {
                handle.abort();
                Err(Error::SessionNotFound(id.to_string()))
            }
        }
    }

    /// Start the task driving this session unless one is already running
    ///
    /// `spawn` runs under the map lock, so two concurrent callers cannot both
    /// start a worker. Returns `false` when a worker is running or the session
    /// has already finished.
    pub async fn start_worker<F>(&self, id: &str, spawn: F) -> Result<bool>
    where
        F: FnOnce(PairingSession) -> AbortHandle,
    {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        let running = entry
            .worker
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if running || entry.record.status.is_terminal() {
            return Ok(false);
        }

        entry.worker = Some(spawn(entry.record.clone()));
        Ok(true)
    }

    /// Whether a worker task is attached and still running
    pub async fn is_running(&self, id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .and_then(|entry| entry.worker.as_ref())
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel a session: abort its worker and drop it from the map
    pub async fn cancel(&self, id: &str) -> Result<PairingSession> {
        let mut entry = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(id)
                .ok_or_else(|| Error::SessionNotFound(id.to_string()))?
        };

        entry.abort_worker();
        if !entry.record.status.is_terminal() {
            entry.record.status = SessionStatus::Cancelled;
        }
        entry.record.touch();
        info!("Cancelled pairing session {}", id);

        Ok(entry.record)
    }

    /// Cancel every session (shutdown)
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().collect()
        };

        let count = drained.len();
        for (_, mut entry) in drained {
            entry.abort_worker();
        }
        count
    }

    /// Remove every session whose deadline has passed
    ///
    /// Sessions still in progress get a `sessionExpired` event and their
    /// worker is aborted. Returns the removed ids.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<SessionEntry> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.record.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();

            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let mut removed = Vec::with_capacity(expired.len());
        for mut entry in expired {
            if !entry.record.status.is_terminal() {
                warn!("Pairing session {} expired", entry.record.id);
                entry.record.status = SessionStatus::Expired;
                let _ = entry.events.send(SessionEvent::SessionExpired);
            } else {
                debug!("Dropping finished session {}", entry.record.id);
            }
            entry.abort_worker();
            removed.push(entry.record.id);
        }

        removed
    }
}
