//! Per-session credential storage on disk
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/<session_id>/creds.json     latest credential blob
//! <data_dir>/<session_id>/.completed     RFC 3339 completion time
//! <data_dir>/<session_id>/...            library auth-state files
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::session::validate_session_id;
use crate::{Error, Result};

const CREDS_FILE: &str = "creds.json";
const COMPLETED_MARKER: &str = ".completed";

/// Filesystem store for session auth state
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one session's auth state
    pub fn session_dir(&self, id: &str) -> Result<PathBuf> {
        validate_session_id(id)?;
        Ok(self.root.join(id))
    }

    /// Create the session directory if needed
    pub async fn ensure_session_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(id)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Persist the credential blob, replacing any previous one
    pub async fn write_creds(&self, id: &str, creds: &serde_json::Value) -> Result<()> {
        let dir = self.ensure_session_dir(id).await?;
        let data = Zeroizing::new(serde_json::to_vec_pretty(creds)?);

        // Write-then-rename so readers never see a torn file
        let tmp = dir.join(format!("{}.tmp", CREDS_FILE));
        fs::write(&tmp, data.as_slice()).await?;
        fs::rename(&tmp, dir.join(CREDS_FILE)).await?;

        debug!("Saved credentials for session {}", id);
        Ok(())
    }

    /// Read the credential blob as text
    pub async fn read_creds(&self, id: &str) -> Result<Zeroizing<String>> {
        let path = self.session_dir(id)?.join(CREDS_FILE);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Zeroizing::new(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::Credentials(
                format!("no credentials saved for session {}", id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn has_creds(&self, id: &str) -> bool {
        match self.session_dir(id) {
            Ok(dir) => fs::try_exists(dir.join(CREDS_FILE)).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Mark the session as completed
    ///
    /// Returns `false` if it was already marked, so the credential blob of a
    /// session is only ever finalized once.
    pub async fn mark_completed(&self, id: &str) -> Result<bool> {
        let marker = self.ensure_session_dir(id).await?.join(COMPLETED_MARKER);
        if fs::try_exists(&marker).await? {
            return Ok(false);
        }

        fs::write(&marker, Utc::now().to_rfc3339()).await?;
        Ok(true)
    }

    /// When the session was marked completed, if ever
    pub async fn completed_at(&self, id: &str) -> Option<DateTime<Utc>> {
        let marker = self.session_dir(id).ok()?.join(COMPLETED_MARKER);
        let text = fs::read_to_string(marker).await.ok()?;
        DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Delete a session directory. Returns whether anything was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let dir = self.session_dir(id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed session directory {}", dir.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete stale session directories
    ///
    /// A completed directory is removed once `retention` has passed since its
    /// completion. A directory that never completed and whose session is no
    /// longer `live` is removed once it has been untouched for `orphan_after`.
    pub async fn sweep(
        &self,
        retention: Duration,
        orphan_after: Duration,
        live: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_session_id(&id).is_err() {
                continue;
            }

            // One bad entry must not stop the rest of the sweep
            let stale = match self
                .is_stale(&entry, &id, retention, orphan_after, live, now)
                .await
            {
                Ok(stale) => stale,
                Err(e) => {
                    warn!("Skipping session directory {}: {}", id, e);
                    continue;
                }
            };

            if stale {
                match self.remove(&id).await {
                    Ok(true) => removed.push(id),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to remove session directory {}: {}", id, e),
                }
            }
        }

        Ok(removed)
    }

    async fn is_stale(
        &self,
        entry: &fs::DirEntry,
        id: &str,
        retention: Duration,
        orphan_after: Duration,
        live: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !entry.file_type().await?.is_dir() {
            return Ok(false);
        }

        Ok(match self.completed_at(id).await {
            Some(completed) => elapsed(completed, now) >= retention,
            None if live.contains(id) => false,
            None => {
                let modified = entry.metadata().await?.modified()?;
                elapsed(DateTime::<Utc>::from(modified), now) >= orphan_after
            }
        })
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, CredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("session"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_and_read_creds() {
        let (_dir, store) = store();

        store
            .write_creds("s1", &json!({"registered": false}))
            .await
            .unwrap();
        store
            .write_creds("s1", &json!({"registered": true, "me": {"id": "1@s.whatsapp.net"}}))
            .await
            .unwrap();

        let text = store.read_creds("s1").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["registered"], true);
        assert!(store.has_creds("s1").await);
        assert!(!store.root().join("s1").join("creds.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_missing_creds() {
        let (_dir, store) = store();
        let err = store.read_creds("nobody").await.unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
        assert!(!store.has_creds("nobody").await);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (_dir, store) = store();
        assert!(store.session_dir("../outside").is_err());
        assert!(store.write_creds("a/b", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_completed_once() {
        let (_dir, store) = store();
        assert!(store.mark_completed("s1").await.unwrap());
        assert!(!store.mark_completed("s1").await.unwrap());
        assert!(store.completed_at("s1").await.is_some());
    }

    #[tokio::test]
    async fn test_remove() {
        let (_dir, store) = store();
        store.write_creds("s1", &json!({})).await.unwrap();

        assert!(store.remove("s1").await.unwrap());
        assert!(!store.remove("s1").await.unwrap());
        assert!(!store.root().join("s1").exists());
    }

    #[tokio::test]
    async fn test_sweep_completed_after_retention() {
        let (_dir, store) = store();
        store.write_creds("done", &json!({})).await.unwrap();
        store.mark_completed("done").await.unwrap();
        let live = HashSet::new();
        let retention = Duration::from_secs(600);
        let orphan_after = Duration::from_secs(3600);

        // Inside the retention window
        let removed = store
            .sweep(retention, orphan_after, &live, Utc::now())
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert!(store.root().join("done").exists());

        let later = Utc::now() + chrono::Duration::seconds(601);
        let removed = store.sweep(retention, orphan_after, &live, later).await.unwrap();
        assert_eq!(removed, vec!["done".to_string()]);
        assert!(!store.root().join("done").exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_sessions() {
        let (_dir, store) = store();
        store.ensure_session_dir("active").await.unwrap();
        store.ensure_session_dir("orphan").await.unwrap();

        let live: HashSet<String> = ["active".to_string()].into_iter().collect();
        let later = Utc::now() + chrono::Duration::seconds(5);
        let removed = store
            .sweep(Duration::from_secs(600), Duration::ZERO, &live, later)
            .await
            .unwrap();

        assert_eq!(removed, vec!["orphan".to_string()]);
        assert!(store.root().join("active").exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_root() {
        let (_dir, store) = store();
        let removed = store
            .sweep(Duration::ZERO, Duration::ZERO, &HashSet::new(), Utc::now())
            .await
            .unwrap();
        assert!(removed.is_empty());
    }
}
