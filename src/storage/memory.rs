//! In-process storage backend for tests and development.

use crate::keys::SigningKey;
use crate::ledger::record::{IssuedCredential, SessionRecord};
use crate::storage::{KeyStorage, LedgerStorage, StorageError};
use crate::token::Fingerprint;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// HashMap-backed implementation of both storage traits.
///
/// `set_unavailable` lets tests exercise the infrastructure-failure
/// paths without a real backend outage.
#[derive(Default)]
pub struct MemoryStorage {
    keys: RwLock<HashMap<String, SigningKey>>,
    // Lock order when both are taken: credentials, then subject_index.
    credentials: RwLock<HashMap<String, IssuedCredential>>,
    subject_index: RwLock<HashMap<String, HashSet<String>>>,
    sessions: RwLock<Vec<SessionRecord>>,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with
    /// [`StorageError::Unavailable`] until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "backend marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    /// Number of stored session rows.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl KeyStorage for MemoryStorage {
    async fn load_keys(&self) -> Result<Vec<SigningKey>, StorageError> {
        self.check_available()?;
        let keys = self.keys.read().await;
        Ok(keys.values().cloned().collect())
    }

    async fn persist_rotation(
        &self,
        new_active: &SigningKey,
        retired: Option<&SigningKey>,
    ) -> Result<(), StorageError> {
        self.check_available()?;
        // One write lock covers both rows, so a concurrent load_keys sees
        // either the pre- or post-rotation state.
        let mut keys = self.keys.write().await;
        keys.insert(new_active.kid.clone(), new_active.clone());
        if let Some(prev) = retired {
            keys.insert(prev.kid.clone(), prev.clone());
        }
        Ok(())
    }

    async fn delete_key(&self, kid: &str) -> Result<(), StorageError> {
        self.check_available()?;
        let mut keys = self.keys.write().await;
        keys.remove(kid);
        Ok(())
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn insert_credential(&self, record: &IssuedCredential) -> Result<(), StorageError> {
        self.check_available()?;
        let mut credentials = self.credentials.write().await;
        let key = record.fingerprint.as_str().to_string();
        if credentials.contains_key(&key) {
            return Err(StorageError::Duplicate { key });
        }
        credentials.insert(key.clone(), record.clone());

        let mut index = self.subject_index.write().await;
        index
            .entry(record.subject_id.clone())
            .or_default()
            .insert(key);
        Ok(())
    }

    async fn find_credential(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<IssuedCredential>, StorageError> {
        self.check_available()?;
        let credentials = self.credentials.read().await;
        Ok(credentials.get(fingerprint.as_str()).cloned())
    }

    async fn mark_revoked(&self, fingerprint: &Fingerprint) -> Result<(), StorageError> {
        self.check_available()?;
        let mut credentials = self.credentials.write().await;
        if let Some(record) = credentials.get_mut(fingerprint.as_str()) {
            record.revoke();
        }
        Ok(())
    }

    async fn revoke_all_for_subject(&self, subject_id: &str) -> Result<u64, StorageError> {
        self.check_available()?;
        // Lock order everywhere else is credentials before subject_index;
        // snapshot the index here rather than holding both in reverse.
        let fingerprints: Vec<String> = {
            let index = self.subject_index.read().await;
            match index.get(subject_id) {
                Some(set) => set.iter().cloned().collect(),
                None => return Ok(0),
            }
        };

        let mut credentials = self.credentials.write().await;
        let mut revoked = 0u64;
        for fp in &fingerprints {
            if let Some(record) = credentials.get_mut(fp) {
                if !record.is_revoked() {
                    record.revoke();
                    revoked += 1;
                }
            }
        }
        Ok(revoked)
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        self.check_available()?;
        let mut sessions = self.sessions.write().await;
        sessions.push(session.clone());
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        self.check_available()?;
        let mut credentials = self.credentials.write().await;
        let mut index = self.subject_index.write().await;
        let before = credentials.len();
        credentials.retain(|_, record| !record.is_expired());
        for fingerprints in index.values_mut() {
            fingerprints.retain(|fp| credentials.contains_key(fp));
        }
        let mut purged = (before - credentials.len()) as u64;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|s| s.expires_at > chrono::Utc::now());
        purged += (before - sessions.len()) as u64;

        Ok(purged)
    }
}
