use crate::token::{CredentialClass, Fingerprint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger row for one issued credential.
///
/// Stores the fingerprint, never the raw token. `revoked_at`, once set,
/// is never cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub id: String,
    pub subject_id: String,
    pub fingerprint: Fingerprint,
    pub class: CredentialClass,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl IssuedCredential {
    pub fn new(
        subject_id: String,
        fingerprint: Fingerprint,
        class: CredentialClass,
        expires_at: DateTime<Utc>,
    ) -> Self {
        IssuedCredential {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id,
            fingerprint,
            class,
            expires_at,
            issued_at: Utc::now(),
            revoked_at: None,
        }
    }

    pub fn revoke(&mut self) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(Utc::now());
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Valid only while unrevoked and unexpired.
    pub fn is_live(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }
}

/// Best-effort session row created alongside a login issuance.
///
/// An auxiliary audit/continuity aid; a write failure here never fails
/// the surrounding issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub subject_id: String,
    pub session_fingerprint: Fingerprint,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        subject_id: String,
        session_fingerprint: Fingerprint,
        expires_at: DateTime<Utc>,
    ) -> Self {
        SessionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id,
            session_fingerprint,
            ip_address: None,
            user_agent: None,
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }
}
