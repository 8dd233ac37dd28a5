//! Durable storage backends for signing keys and the revocation ledger.
//!
//! Two traits keep the seams narrow: [`KeyStorage`] persists signing-key
//! rows with an atomic rotation write, and [`LedgerStorage`] persists
//! issued-credential fingerprints and session rows. [`MemoryStorage`]
//! backs tests and development; [`RedisStorage`] is the durable backend.

pub mod memory;
pub mod redis;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use crate::keys::SigningKey;
use crate::ledger::record::{IssuedCredential, SessionRecord};
use crate::token::Fingerprint;
use async_trait::async_trait;
use thiserror::Error;

/// Backend-level failures, kept separate from credential verdicts.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A row with this key already exists
    #[error("duplicate entry: {key}")]
    Duplicate {
        /// The conflicting storage key
        key: String,
    },

    /// The backend could not be reached or timed out
    #[error("backend unavailable: {reason}")]
    Unavailable {
        /// Description of the failure
        reason: String,
    },

    /// A stored row failed to deserialize
    #[error("stored data corrupt: {reason}")]
    Corrupt {
        /// Description of the corruption
        reason: String,
    },
}

/// Persistence for signing-key rows.
#[async_trait]
pub trait KeyStorage: Send + Sync {
    /// Load every persisted key, active and retired.
    async fn load_keys(&self) -> Result<Vec<SigningKey>, StorageError>;

    /// Persist a rotation as a single unit: the new active key plus the
    /// retired predecessor (absent only at bootstrap).
    ///
    /// A reader of the store must never observe the new key without the
    /// predecessor's deactivation, or vice versa.
    async fn persist_rotation(
        &self,
        new_active: &SigningKey,
        retired: Option<&SigningKey>,
    ) -> Result<(), StorageError>;

    /// Remove a pruned key row.
    async fn delete_key(&self, kid: &str) -> Result<(), StorageError>;
}

/// Persistence for issued-credential fingerprints and session rows.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Insert a new issuance row.
    ///
    /// Fails with [`StorageError::Duplicate`] if the fingerprint is
    /// already recorded.
    async fn insert_credential(&self, record: &IssuedCredential) -> Result<(), StorageError>;

    /// Fetch the row for a fingerprint, if any.
    async fn find_credential(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<IssuedCredential>, StorageError>;

    /// Set `revoked_at` on the row if not already set.
    ///
    /// A missing or already-revoked row is a no-op, not an error.
    async fn mark_revoked(&self, fingerprint: &Fingerprint) -> Result<(), StorageError>;

    /// Revoke every live row for a subject; returns how many changed.
    async fn revoke_all_for_subject(&self, subject_id: &str) -> Result<u64, StorageError>;

    /// Insert a session row.
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StorageError>;

    /// Drop rows whose expiry has passed; returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, StorageError>;
}
