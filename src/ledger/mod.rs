//! The revocation ledger: every issued credential leaves a fingerprint
//! row here, and revocation flips that row.
//!
//! The ledger is fail-closed. Validation asks
//! [`RevocationLedger::is_revoked_or_unknown`], and a fingerprint with
//! no row counts as revoked, so a lost or purged row can only deny
//! access, never grant it.

pub mod record;

pub use record::{IssuedCredential, SessionRecord};

use crate::error::CredentialError;
use crate::metrics;
use crate::storage::LedgerStorage;
use crate::token::Fingerprint;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RevocationLedger {
    storage: Arc<dyn LedgerStorage>,
}

impl RevocationLedger {
    pub fn new(storage: Arc<dyn LedgerStorage>) -> Self {
        RevocationLedger { storage }
    }

    /// Record a fresh issuance.
    ///
    /// Issuance must not hand out a token whose row never landed, so
    /// the caller propagates this error instead of returning the token.
    pub async fn record_issuance(&self, record: &IssuedCredential) -> Result<(), CredentialError> {
        self.storage.insert_credential(record).await?;
        debug!(
            subject_id = %record.subject_id,
            class = %record.class,
            "issuance recorded"
        );
        Ok(())
    }

    /// Whether a fingerprint is revoked, past its expiry, or has no
    /// row at all. Backends that reap expired rows and backends that
    /// keep them until a sweep give the same answer here.
    ///
    /// A backend failure propagates as an error; it is never collapsed
    /// into a verdict.
    pub async fn is_revoked_or_unknown(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<bool, CredentialError> {
        match self.storage.find_credential(fingerprint).await? {
            Some(record) => Ok(!record.is_live()),
            None => Ok(true),
        }
    }

    /// Revoke one credential by fingerprint. Idempotent; revoking an
    /// unknown fingerprint is a successful no-op.
    pub async fn revoke(&self, fingerprint: &Fingerprint) -> Result<(), CredentialError> {
        self.storage.mark_revoked(fingerprint).await?;
        metrics::record_revocation("single");
        info!(fingerprint = %fingerprint, "credential revoked");
        Ok(())
    }

    /// Revoke every live credential a subject holds; returns how many
    /// rows changed.
    pub async fn revoke_all_for_subject(&self, subject_id: &str) -> Result<u64, CredentialError> {
        let revoked = self.storage.revoke_all_for_subject(subject_id).await?;
        metrics::record_revocation("subject");
        metrics::record_security_event("subject_revocation");
        info!(subject_id, revoked, "all credentials revoked for subject");
        Ok(revoked)
    }

    /// Best-effort session row alongside a login issuance. A write
    /// failure is logged and swallowed; it never fails the issuance.
    pub async fn record_session(&self, session: &SessionRecord) {
        if let Err(e) = self.storage.insert_session(session).await {
            warn!(
                subject_id = %session.subject_id,
                error = %e,
                "session record dropped"
            );
        }
    }

    /// Drop ledger rows whose credentials have expired.
    pub async fn purge_expired(&self) -> Result<u64, CredentialError> {
        let purged = self.storage.purge_expired().await?;
        if purged > 0 {
            debug!(purged, "expired ledger rows purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::token::CredentialClass;
    use chrono::{Duration, Utc};

    fn ledger() -> (RevocationLedger, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (RevocationLedger::new(storage.clone()), storage)
    }

    fn credential(subject: &str, token: &str) -> IssuedCredential {
        IssuedCredential::new(
            subject.to_string(),
            Fingerprint::of(token),
            CredentialClass::Access,
            Utc::now() + Duration::minutes(15),
        )
    }

    #[tokio::test]
    async fn test_recorded_credential_is_not_revoked() {
        let (ledger, _) = ledger();
        let rec = credential("user-1", "token-a");

        ledger.record_issuance(&rec).await.unwrap();
        assert!(!ledger
            .is_revoked_or_unknown(&rec.fingerprint)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_fingerprint_counts_as_revoked() {
        let (ledger, _) = ledger();
        let never_issued = Fingerprint::of("never-issued");

        assert!(ledger.is_revoked_or_unknown(&never_issued).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_flips_the_row() {
        let (ledger, _) = ledger();
        let rec = credential("user-1", "token-a");
        ledger.record_issuance(&rec).await.unwrap();

        ledger.revoke(&rec.fingerprint).await.unwrap();
        assert!(ledger
            .is_revoked_or_unknown(&rec.fingerprint)
            .await
            .unwrap());

        // Idempotent
        ledger.revoke(&rec.fingerprint).await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_unknown_fingerprint_is_a_no_op() {
        let (ledger, _) = ledger();
        ledger.revoke(&Fingerprint::of("never-issued")).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_rejected() {
        let (ledger, _) = ledger();
        let rec = credential("user-1", "token-a");

        ledger.record_issuance(&rec).await.unwrap();
        let result = ledger.record_issuance(&rec).await;
        assert!(matches!(
            result,
            Err(CredentialError::DuplicateFingerprint)
        ));
    }

    #[tokio::test]
    async fn test_revoke_all_for_subject_counts_live_rows() {
        let (ledger, _) = ledger();
        let a = credential("user-1", "token-a");
        let b = credential("user-1", "token-b");
        let other = credential("user-2", "token-c");
        ledger.record_issuance(&a).await.unwrap();
        ledger.record_issuance(&b).await.unwrap();
        ledger.record_issuance(&other).await.unwrap();

        // One already revoked, so only the other counts
        ledger.revoke(&a.fingerprint).await.unwrap();
        let revoked = ledger.revoke_all_for_subject("user-1").await.unwrap();
        assert_eq!(revoked, 1);

        assert!(ledger.is_revoked_or_unknown(&b.fingerprint).await.unwrap());
        assert!(!ledger
            .is_revoked_or_unknown(&other.fingerprint)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_backend_failure_is_an_error_not_a_verdict() {
        let (ledger, storage) = ledger();
        let rec = credential("user-1", "token-a");
        ledger.record_issuance(&rec).await.unwrap();

        storage.set_unavailable(true);
        let result = ledger.is_revoked_or_unknown(&rec.fingerprint).await;
        assert!(matches!(result, Err(CredentialError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_session_write_failure_is_swallowed() {
        let (ledger, storage) = ledger();
        storage.set_unavailable(true);

        let session = SessionRecord::new(
            "user-1".to_string(),
            Fingerprint::of("refresh-token"),
            Utc::now() + Duration::days(7),
        );
        ledger.record_session(&session).await;
        assert_eq!(storage.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_purge_drops_expired_rows() {
        let (ledger, _) = ledger();
        let mut expired = credential("user-1", "token-a");
        expired.expires_at = Utc::now() - Duration::minutes(1);
        let live = credential("user-1", "token-b");
        ledger.record_issuance(&expired).await.unwrap();
        ledger.record_issuance(&live).await.unwrap();

        let purged = ledger.purge_expired().await.unwrap();
        assert_eq!(purged, 1);

        // The expired row is gone, which still reads as revoked
        assert!(ledger
            .is_revoked_or_unknown(&expired.fingerprint)
            .await
            .unwrap());
        assert!(!ledger.is_revoked_or_unknown(&live.fingerprint).await.unwrap());
    }
}
