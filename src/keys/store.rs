//! The key store: lock-free snapshot reads for issuance and validation,
//! serialized writes for rotation.
//!
//! Readers load an immutable [`KeyRing`] through an [`ArcSwap`], so token
//! signing and verification never wait on a rotation in progress. The
//! write path persists the new key set before swapping the snapshot; a
//! storage failure leaves the previous key active.

use crate::error::CredentialError;
use crate::keys::material::{KeyAlgorithm, SigningKey, VerificationKey};
use crate::storage::KeyStorage;
use arc_swap::ArcSwap;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Immutable snapshot of the key set: at most one active key plus the
/// retired keys still inside the retention window.
#[derive(Debug)]
pub struct KeyRing {
    active: Option<Arc<SigningKey>>,
    retired: HashMap<String, Arc<SigningKey>>,
}

impl KeyRing {
    fn empty() -> Self {
        KeyRing {
            active: None,
            retired: HashMap::new(),
        }
    }

    /// The currently active key, if any.
    pub fn active(&self) -> Option<&Arc<SigningKey>> {
        self.active.as_ref()
    }

    /// Resolve a key by `kid`, active or retired.
    pub fn get(&self, kid: &str) -> Option<&Arc<SigningKey>> {
        if let Some(active) = &self.active {
            if active.kid == kid {
                return Some(active);
            }
        }
        self.retired.get(kid)
    }

    /// Total number of keys in the snapshot.
    pub fn len(&self) -> usize {
        self.retired.len() + usize::from(self.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds the signing keys and enforces the one-active-key lifecycle.
pub struct KeyStore {
    ring: ArcSwap<KeyRing>,
    storage: Arc<dyn KeyStorage>,
    algorithm: KeyAlgorithm,
    rotation_lock: Mutex<()>,
    issuance_counter: AtomicU64,
}

impl KeyStore {
    /// Create an empty store; call [`load`](Self::load) to hydrate it.
    pub fn new(storage: Arc<dyn KeyStorage>, algorithm: KeyAlgorithm) -> Self {
        KeyStore {
            ring: ArcSwap::new(Arc::new(KeyRing::empty())),
            storage,
            algorithm,
            rotation_lock: Mutex::new(()),
            issuance_counter: AtomicU64::new(0),
        }
    }

    /// Hydrate the snapshot from storage. Returns how many keys loaded.
    pub async fn load(&self) -> Result<usize, CredentialError> {
        let _guard = self.rotation_lock.lock().await;

        let keys = self.storage.load_keys().await?;
        let count = keys.len();

        let mut actives: Vec<SigningKey> = Vec::new();
        let mut retired: HashMap<String, Arc<SigningKey>> = HashMap::new();
        for key in keys {
            if key.is_active {
                actives.push(key);
            } else {
                retired.insert(key.kid.clone(), Arc::new(key));
            }
        }

        // A correct store has at most one active row; demote older
        // duplicates rather than refusing to start
        actives.sort_by_key(|k| k.created_at);
        let active = actives.pop().map(Arc::new);
        for mut stale in actives {
            warn!(kid = %stale.kid, "duplicate active key row, demoting");
            stale.mark_retired("duplicate active row");
            if let Some(active) = &active {
                // Write the demotion back; otherwise the next hydration
                // repeats this repair
                if let Err(e) = self.storage.persist_rotation(active, Some(&stale)).await {
                    warn!(kid = %stale.kid, error = %e, "demotion not persisted");
                }
            }
            retired.insert(stale.kid.clone(), Arc::new(stale));
        }

        self.ring.store(Arc::new(KeyRing { active, retired }));
        Ok(count)
    }

    /// The key new credentials are signed with.
    pub fn get_active_key(&self) -> Result<Arc<SigningKey>, CredentialError> {
        self.ring
            .load()
            .active
            .clone()
            .ok_or(CredentialError::NoActiveKey)
    }

    /// Resolve any held key, active or retired, by its `kid`.
    pub fn get_key_by_id(&self, kid: &str) -> Result<Arc<SigningKey>, CredentialError> {
        self.ring
            .load()
            .get(kid)
            .cloned()
            .ok_or_else(|| CredentialError::UnknownKey {
                kid: kid.to_string(),
            })
    }

    /// Verification half for a `kid`, shaped for the codec's lookup.
    pub fn verification_key(&self, kid: &str) -> Option<VerificationKey> {
        let ring = self.ring.load();
        let key = ring.get(kid)?;
        match key.verification_key() {
            Ok(vk) => Some(vk),
            Err(e) => {
                warn!(kid = kid, error = %e, "stored verification key rejected");
                None
            }
        }
    }

    /// The current snapshot, for status reporting.
    pub fn ring(&self) -> Arc<KeyRing> {
        self.ring.load_full()
    }

    /// Generate a fresh key and make it the active one.
    ///
    /// The new key and the retiring predecessor are persisted as one
    /// unit before the in-memory snapshot moves; on a storage failure
    /// the previous key stays active and the error is returned.
    pub async fn activate_new_key(
        &self,
        reason: &str,
    ) -> Result<Arc<SigningKey>, CredentialError> {
        let _guard = self.rotation_lock.lock().await;

        let next = SigningKey::generate(self.algorithm)?;

        let current = self.ring.load_full();
        let retiring = current.active.as_ref().map(|active| {
            let mut key = (**active).clone();
            key.mark_retired(reason);
            key
        });

        self.storage
            .persist_rotation(&next, retiring.as_ref())
            .await?;

        let next = Arc::new(next);
        let mut retired = current.retired.clone();
        if let Some(retiring) = retiring {
            retired.insert(retiring.kid.clone(), Arc::new(retiring));
        }

        self.ring.store(Arc::new(KeyRing {
            active: Some(next.clone()),
            retired,
        }));
        self.issuance_counter.store(0, Ordering::Relaxed);

        info!(kid = %next.kid, reason = reason, "signing key activated");
        Ok(next)
    }

    /// Drop retired keys whose retention window has passed.
    ///
    /// `retention` must cover the longest credential TTL so every token
    /// still in flight can resolve its signing key.
    pub async fn prune_retired(&self, retention: Duration) -> Result<u64, CredentialError> {
        let _guard = self.rotation_lock.lock().await;

        let now = Utc::now();
        let current = self.ring.load_full();

        let expired: Vec<String> = current
            .retired
            .iter()
            .filter(|(_, key)| match key.rotated_at {
                Some(rotated_at) => now - rotated_at > retention,
                None => false,
            })
            .map(|(kid, _)| kid.clone())
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        // Storage rows go before the snapshot entries
        for kid in &expired {
            self.storage.delete_key(kid).await?;
        }

        let mut retired = current.retired.clone();
        for kid in &expired {
            retired.remove(kid);
        }
        self.ring.store(Arc::new(KeyRing {
            active: current.active.clone(),
            retired,
        }));

        info!(pruned = expired.len(), "retired signing keys pruned");
        Ok(expired.len() as u64)
    }

    /// Count one issuance under the active key; returns the new total.
    pub fn record_issuance(&self) -> u64 {
        self.issuance_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Issuances under the active key since it was activated.
    pub fn issuance_count(&self) -> u64 {
        self.issuance_counter.load(Ordering::Relaxed)
    }
}
