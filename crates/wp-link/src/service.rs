//! Pairing service
//!
//! Shared state behind both the HTTP and WebSocket surfaces.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use wp_core::{
    Config, CredentialStore, Error, PairingSession, PhoneNumber, Result, SessionEvent,
    SessionManager, SessionStatus,
};

use crate::bridge::BridgeConnector;
use crate::client::LinkConnector;
use crate::worker::{PairingWorker, WorkerSettings};

/// What one sweep removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions dropped from memory
    pub expired: Vec<String>,
    /// Session directories deleted from disk
    pub removed_dirs: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.removed_dirs.is_empty()
    }
}

/// Creates, drives and cleans up pairing sessions
#[derive(Clone)]
pub struct PairingService {
    config: Arc<Config>,
    sessions: SessionManager,
    store: CredentialStore,
    connector: Arc<dyn LinkConnector>,
}

impl PairingService {
    pub fn new(config: Config, connector: Arc<dyn LinkConnector>) -> Self {
        let sessions = SessionManager::new(config.session.timeout());
        let store = CredentialStore::new(config.session.data_path());

        Self {
            config: Arc::new(config),
            sessions,
            store,
            connector,
        }
    }

    /// Service backed by the child-process bridge
    pub fn with_bridge(config: Config) -> Self {
        let connector = Arc::new(BridgeConnector::new(config.bridge.clone()));
        Self::new(config, connector)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Validate the number and register a new session
    pub async fn create_session(&self, raw_phone: &str) -> Result<PairingSession> {
        let phone = PhoneNumber::parse(raw_phone)?;
        Ok(self.sessions.create(phone).await)
    }

    /// Register a session under a client-chosen id
    pub async fn create_session_with_id(
        &self,
        id: &str,
        raw_phone: &str,
    ) -> Result<PairingSession> {
        let phone = PhoneNumber::parse(raw_phone)?;
        self.sessions.create_with_id(id, phone).await
    }

    /// Spawn the session's worker
    ///
    /// Returns `false` if a worker is already running or the session has
    /// finished.
    pub async fn start_pairing(&self, id: &str) -> Result<bool> {
        let settings = WorkerSettings::from(self.config.as_ref());

        let started = self
            .sessions
            .start_worker(id, |record| {
                let worker = PairingWorker::new(
                    record.id.clone(),
                    record.phone.clone(),
                    self.sessions.clone(),
                    self.store.clone(),
                    Arc::clone(&self.connector),
                    settings,
                );
                let task = tokio::spawn(async move {
                    let status = worker.run().await;
                    info!("Pairing session {} finished: {}", record.id, status);
                });
                task.abort_handle()
            })
            .await?;

        if !started {
            debug!("Pairing session {} already started", id);
        }
        Ok(started)
    }

    /// Create a session and start pairing right away
    pub async fn start_session(&self, raw_phone: &str) -> Result<PairingSession> {
        let session = self.create_session(raw_phone).await?;
        self.start_pairing(&session.id).await?;
        Ok(session)
    }

    /// Block until the session issues its pairing code
    pub async fn wait_for_pairing_code(&self, id: &str, timeout: Duration) -> Result<String> {
        // Subscribe before reading the record so no event slips in between
        let mut events = self.sessions.subscribe(id).await?;
        if let Some(outcome) = self.settled_code(id).await? {
            return outcome;
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::PairingCode { code }) => return Ok(code),
                    Ok(SessionEvent::Error { message }) => return Err(Error::Link(message)),
                    Ok(SessionEvent::SessionExpired) => {
                        return Err(Error::Other(format!("Session {} expired", id)));
                    }
                    Ok(SessionEvent::Connected { .. }) | Err(RecvError::Lagged(_)) => {
                        if let Some(outcome) = self.settled_code(id).await? {
                            return outcome;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => return Err(Error::SessionNotFound(id.to_string())),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Other("Timed out waiting for pairing code".into()))?
    }

    /// The code already issued, or the error of a session that will never issue one
    async fn settled_code(&self, id: &str) -> Result<Option<Result<String>>> {
        let record = self
            .sessions
            .get(id)
            .await
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        if let Some(code) = record.pairing_code {
            return Ok(Some(Ok(code)));
        }

        let outcome = match record.status {
            // The error event follows the status change; the subscriber sees it
            SessionStatus::Failed => match record.error {
                Some(message) => Error::Link(message),
                None => return Ok(None),
            },
            SessionStatus::Expired => Error::Other(format!("Session {} expired", id)),
            SessionStatus::Cancelled => Error::Other(format!("Session {} cancelled", id)),
            SessionStatus::Completed => {
                Error::Other(format!("Session {} linked without a pairing code", id))
            }
            _ => return Ok(None),
        };
        Ok(Some(Err(outcome)))
    }

    /// Cancel a session and delete its directory
    pub async fn cleanup(&self, id: &str) -> Result<PairingSession> {
        let session = self.sessions.cancel(id).await?;
        if let Err(e) = self.store.remove(id).await {
            warn!("Failed to remove session directory {}: {}", id, e);
        }
        Ok(session)
    }

    /// Expire overdue sessions, then prune stale directories on disk
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.sessions.sweep_expired(now).await;

        let mut removed_dirs = Vec::new();
        for id in &expired {
            // Half-paired auth state is useless once the session is gone
            if self.store.completed_at(id).await.is_some() {
                continue;
            }
            match self.store.remove(id).await {
                Ok(true) => removed_dirs.push(id.clone()),
                Ok(false) => {}
                Err(e) => warn!("Failed to remove session directory {}: {}", id, e),
            }
        }

        let live: HashSet<String> = self
            .sessions
            .list()
            .await
            .into_iter()
            .map(|session| session.id)
            .collect();
        removed_dirs.extend(
            self.store
                .sweep(
                    self.config.session.retention(),
                    self.config.session.timeout(),
                    &live,
                    now,
                )
                .await?,
        );

        Ok(SweepReport {
            expired,
            removed_dirs,
        })
    }

    /// Cancel every live session
    pub async fn shutdown(&self) -> usize {
        let count = self.sessions.cancel_all().await;
        if count > 0 {
            info!("Cancelled {} live pairing session(s)", count);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DisconnectReason, LinkEvent};
    use crate::worker::tests::{ScriptedConnector, close, creds};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.session.data_dir = dir.path().join("session").to_string_lossy().into_owned();
        config.session.pairing_delay_ms = 0;
        config.session.timeout_secs = 60;
        config
    }

    fn service(dir: &TempDir, connector: Arc<ScriptedConnector>) -> PairingService {
        PairingService::new(config(dir), connector)
    }

    async fn wait_until_finished(service: &PairingService, id: &str) -> PairingSession {
        for _ in 0..100 {
            let record = service.sessions().get(id).await.unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {} did not finish", id);
    }

    #[tokio::test]
    async fn test_create_session_rejects_invalid_phone() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(ScriptedConnector::new(vec![])));

        let err = service.create_session("not-a-number").await.unwrap_err();
        assert!(matches!(err, Error::InvalidPhoneNumber(_)));
        assert!(service.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_start_session_completes() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            LinkEvent::Connecting,
            creds(true),
            LinkEvent::Open,
        ]]));
        let service = service(&dir, connector.clone());

        let session = service.start_session("+1 (415) 555-0123").await.unwrap();
        let code = service
            .wait_for_pairing_code(&session.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, "ABCD-1234");

        let record = wait_until_finished(&service, &session.id).await;
        assert_eq!(record.status, SessionStatus::Completed);
        assert!(service.store().has_creds(&session.id).await);
    }

    #[tokio::test]
    async fn test_start_pairing_only_once() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            creds(true),
            LinkEvent::Open,
        ]]));
        let service = service(&dir, connector.clone());

        let session = service.create_session("14155550123").await.unwrap();
        assert!(service.start_pairing(&session.id).await.unwrap());
        assert!(!service.start_pairing(&session.id).await.unwrap());

        wait_until_finished(&service, &session.id).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        // Finished sessions are not restarted
        assert!(!service.start_pairing(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_code_reports_failure() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new(vec![vec![close(
            DisconnectReason::LoggedOut,
        )]]));
        let mut config = config(&dir);
        // Keep the code request from racing the logout
        config.session.pairing_delay_ms = 5_000;
        let service = PairingService::new(config, connector);

        let session = service.start_session("14155550123").await.unwrap();
        let err = service
            .wait_for_pairing_code(&session.id, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("logged out"));
    }

    #[tokio::test]
    async fn test_wait_for_code_after_session_failed() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(ScriptedConnector::failing()));

        let session = service.start_session("14155550123").await.unwrap();
        let record = wait_until_finished(&service, &session.id).await;
        assert_eq!(record.status, SessionStatus::Failed);

        // No more events come; the recorded error is returned without waiting
        let started = std::time::Instant::now();
        let err = service
            .wait_for_pairing_code(&session.id, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Link(_)));
        assert!(err.to_string().contains("bridge not installed"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_for_code_returns_issued_code() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(ScriptedConnector::new(vec![])));
        let session = service.create_session("14155550123").await.unwrap();
        service
            .sessions()
            .publish(
                &session.id,
                SessionEvent::PairingCode {
                    code: "WXYZ-5678".into(),
                },
            )
            .await
            .unwrap();

        let code = service
            .wait_for_pairing_code(&session.id, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(code, "WXYZ-5678");
    }

    #[tokio::test]
    async fn test_wait_for_code_timeout() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(ScriptedConnector::new(vec![])));
        let session = service.create_session("14155550123").await.unwrap();

        let err = service
            .wait_for_pairing_code(&session.id, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Timed out"));

        assert!(matches!(
            service
                .wait_for_pairing_code("missing", Duration::from_millis(50))
                .await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_directory() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(ScriptedConnector::new(vec![])));
        let session = service.create_session("14155550123").await.unwrap();
        service.store().ensure_session_dir(&session.id).await.unwrap();

        let cancelled = service.cleanup(&session.id).await.unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert!(!service.store().root().join(&session.id).exists());
        assert!(matches!(
            service.cleanup(&session.id).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_expires_sessions_and_dirs() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(ScriptedConnector::new(vec![])));
        let stale = service.create_session("14155550123").await.unwrap();
        service.store().ensure_session_dir(&stale.id).await.unwrap();

        let report = service.sweep(Utc::now()).await.unwrap();
        assert!(report.is_empty());

        let report = service
            .sweep(stale.expires_at + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.expired, vec![stale.id.clone()]);
        assert_eq!(report.removed_dirs, vec![stale.id.clone()]);
        assert!(service.sessions().get(&stale.id).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_continues_past_unremovable_dir() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(ScriptedConnector::new(vec![])));
        let broken = service.create_session("14155550123").await.unwrap();
        let stale = service.create_session("447911123456").await.unwrap();

        // A plain file where the session directory should be cannot be removed
        tokio::fs::create_dir_all(service.store().root()).await.unwrap();
        tokio::fs::write(service.store().root().join(&broken.id), b"x")
            .await
            .unwrap();
        service.store().ensure_session_dir(&stale.id).await.unwrap();

        let report = service
            .sweep(stale.expires_at + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.expired.len(), 2);
        assert_eq!(report.removed_dirs, vec![stale.id.clone()]);
        assert!(service.store().root().join(&broken.id).exists());
        assert!(!service.store().root().join(&stale.id).exists());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(ScriptedConnector::new(vec![])));
        service.create_session("14155550123").await.unwrap();
        service.create_session("447911123456").await.unwrap();

        assert_eq!(service.shutdown().await, 2);
        assert!(service.sessions().is_empty().await);
    }
}
