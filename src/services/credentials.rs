//! Per-user OAuth credentials persisted as a single JSON document.
//!
//! The file maps chat user ids to the token set Google handed out for them.
//! Writes replace the whole document through a temp file + rename, and only
//! become visible to readers once that rename succeeded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::error::AppResult;

/// Refresh this long before the provider would start rejecting the token.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Space separated list of granted scopes.
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expiry as unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry_date
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// True once the access token is expired or about to be.
    /// Tokens without a recorded expiry are treated as valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) <= now,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.scope.split_whitespace().collect()
    }
}

#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    credentials: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    /// Load the store from disk. A missing or malformed file is a startup error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let path_str = path.display().to_string();

        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::File(path_str.clone(), e.to_string()))?;
        let credentials: HashMap<String, Credential> = serde_json::from_str(&content)
            .map_err(|e| ConfigError::File(path_str.clone(), format!("malformed JSON: {}", e)))?;

        info!(
            "Loaded credentials for {} user(s) from {}",
            credentials.len(),
            path_str
        );

        Ok(Self {
            path,
            credentials: RwLock::new(credentials),
        })
    }

    pub async fn get(&self, user_id: &str) -> Option<Credential> {
        self.credentials.read().await.get(user_id).cloned()
    }

    /// Store `credential` for `user_id` and return the snapshot now on disk.
    ///
    /// The write lock is held for the whole merge-persist-swap, so concurrent
    /// puts for different users are applied one after the other.
    pub async fn put(
        &self,
        user_id: &str,
        credential: Credential,
    ) -> AppResult<HashMap<String, Credential>> {
        let mut guard = self.credentials.write().await;

        let mut next = guard.clone();
        next.insert(user_id.to_string(), credential);

        Self::persist(&self.path, &next).await?;
        *guard = next.clone();

        debug!("Stored credential for user {}", user_id);
        Ok(next)
    }

    pub async fn len(&self) -> usize {
        self.credentials.read().await.len()
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(path: &Path, snapshot: &HashMap<String, Credential>) -> AppResult<()> {
        let content = serde_json::to_string_pretty(snapshot)?;

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content.as_bytes()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = tokio::fs::set_permissions(&temp_path, perms).await;
        }

        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn credential(token: &str) -> Credential {
        Credential {
            access_token: token.to_string(),
            refresh_token: Some(format!("refresh-{}", token)),
            scope: "https://www.googleapis.com/auth/calendar".to_string(),
            token_type: "Bearer".to_string(),
            expiry_date: Some(1_900_000_000_000),
        }
    }

    fn store_with(dir: &TempDir, content: &str) -> CredentialStore {
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, content).unwrap();
        CredentialStore::load(path).unwrap()
    }

    #[test]
    fn load_fails_for_missing_or_corrupt_files() {
        let dir = TempDir::new().unwrap();
        assert_err!(CredentialStore::load(dir.path().join("absent.json")));

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{\"U1\": ").unwrap();
        assert_err!(CredentialStore::load(corrupt));
    }

    #[tokio::test]
    async fn reads_files_written_by_the_previous_service() {
        let dir = TempDir::new().unwrap();
        let store = store_with(
            &dir,
            r#"{"UMER3B8B1":{"access_token":"ya29.a0","refresh_token":"1//0g","scope":"https://www.googleapis.com/auth/calendar https://www.googleapis.com/auth/admin.directory.resource.calendar.readonly","token_type":"Bearer","expiry_date":1572454263383}}"#,
        );

        let stored = store.get("UMER3B8B1").await.unwrap();
        assert_eq!(stored.access_token, "ya29.a0");
        assert_eq!(stored.scopes().len(), 2);
        assert!(stored.is_expired());
        assert!(store.get("U404").await.is_none());
    }

    #[tokio::test]
    async fn put_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "{}");

        let snapshot = assert_ok!(store.put("U1", credential("a")).await);
        assert_eq!(snapshot.get("U1"), Some(&credential("a")));
        assert_eq!(store.get("U1").await, Some(credential("a")));

        let reloaded = CredentialStore::load(store.path()).unwrap();
        assert_eq!(reloaded.get("U1").await, Some(credential("a")));
        assert!(!dir.path().join("tokens.json.tmp").exists());
    }

    #[tokio::test]
    async fn concurrent_puts_for_different_users_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_with(&dir, "{}"));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put(&format!("U{}", i), credential(&i.to_string()))
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        assert_eq!(store.len().await, 16);
        let reloaded = CredentialStore::load(store.path()).unwrap();
        assert_eq!(reloaded.len().await, 16);
        assert_eq!(reloaded.get("U7").await, Some(credential("7")));
    }

    #[tokio::test]
    async fn failed_persist_is_not_visible_to_readers() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "{}");
        assert_ok!(store.put("U1", credential("a")).await);

        // A directory where the temp file should go makes the write fail.
        std::fs::create_dir(dir.path().join("tokens.json.tmp")).unwrap();

        assert_err!(store.put("U2", credential("b")).await);
        assert!(store.get("U2").await.is_none());
        assert_eq!(store.get("U1").await, Some(credential("a")));
    }

    #[test]
    fn expiry_honours_the_refresh_margin() {
        let now = Utc::now();
        let mut cred = credential("a");

        cred.expiry_date = Some((now + Duration::seconds(30)).timestamp_millis());
        assert!(cred.is_expired_at(now));

        cred.expiry_date = Some((now + Duration::minutes(10)).timestamp_millis());
        assert!(!cred.is_expired_at(now));

        cred.expiry_date = None;
        assert!(!cred.is_expired_at(now));
    }
}
