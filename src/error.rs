//! Error types for credential issuance, validation and key rotation
//!
//! The taxonomy keeps structural, cryptographic, temporal, revocation and
//! infrastructure failures distinct: callers route them differently
//! (security logging vs. re-authentication vs. retry), so the specific
//! kind must survive until the transport boundary collapses it into an
//! unauthorized response.

use crate::storage::StorageError;
use crate::token::CredentialClass;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Non-exhaustive error enum for forward compatibility
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Token structure could not be parsed
    #[error("Credential malformed: {reason}")]
    Malformed {
        /// Description of the malformation
        reason: String,
    },

    /// No signing key (active or retired) matches the token's key identifier
    #[error("Unknown signing key: {kid}")]
    UnknownKey {
        /// The key identifier carried in the token header
        kid: String,
    },

    /// Signature verification failed
    #[error("Credential signature invalid")]
    BadSignature,

    /// Token expiry has passed
    #[error("Credential expired at {expired_at}")]
    Expired {
        /// When the credential expired
        expired_at: DateTime<Utc>,
    },

    /// Credential was revoked, or no issuance record exists for it
    ///
    /// Ledger absence is deliberately reported as revoked: a credential
    /// whose issuance record was lost must not validate.
    #[error("Credential revoked")]
    Revoked,

    /// A refresh operation was attempted with the wrong credential class
    #[error("Expected {expected} credential, got {actual}")]
    WrongCredentialClass {
        /// The class the operation requires
        expected: CredentialClass,
        /// The class the presented token carries
        actual: CredentialClass,
    },

    /// The key store holds no active signing key
    ///
    /// Must never occur after a successful bootstrap.
    #[error("No active signing key available")]
    NoActiveKey,

    /// The ledger already holds a record for this fingerprint
    #[error("Credential fingerprint already recorded")]
    DuplicateFingerprint,

    /// The identity directory has no entry for the subject
    #[error("Subject not found: {subject}")]
    UnknownSubject {
        /// The subject identifier that failed to resolve
        subject: String,
    },

    /// A persistence or deadline failure; retryable, never a verdict on
    /// the credential itself
    #[error("{stage} unavailable: {reason}")]
    Unavailable {
        /// Which stage of the operation failed
        stage: &'static str,
        /// Description of the infrastructure failure
        reason: String,
        /// Suggested retry duration
        retry_after: Duration,
    },

    /// Startup configuration is missing or invalid
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of the configuration problem
        reason: String,
    },

    /// Internal error (details sanitized in responses)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Error codes for API responses and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Malformed,
    UnknownKey,
    BadSignature,
    Expired,
    Revoked,
    WrongCredentialClass,
    NoActiveKey,
    DuplicateFingerprint,
    UnknownSubject,
    Unavailable,
    Config,
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "CREDENTIAL_MALFORMED",
            Self::UnknownKey => "CREDENTIAL_UNKNOWN_KEY",
            Self::BadSignature => "CREDENTIAL_BAD_SIGNATURE",
            Self::Expired => "CREDENTIAL_EXPIRED",
            Self::Revoked => "CREDENTIAL_REVOKED",
            Self::WrongCredentialClass => "CREDENTIAL_WRONG_CLASS",
            Self::NoActiveKey => "KEY_NO_ACTIVE",
            Self::DuplicateFingerprint => "LEDGER_DUPLICATE_FINGERPRINT",
            Self::UnknownSubject => "SUBJECT_UNKNOWN",
            Self::Unavailable => "SERVICE_UNAVAILABLE",
            Self::Config => "CONFIG_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl CredentialError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed { .. } => ErrorCode::Malformed,
            Self::UnknownKey { .. } => ErrorCode::UnknownKey,
            Self::BadSignature => ErrorCode::BadSignature,
            Self::Expired { .. } => ErrorCode::Expired,
            Self::Revoked => ErrorCode::Revoked,
            Self::WrongCredentialClass { .. } => ErrorCode::WrongCredentialClass,
            Self::NoActiveKey => ErrorCode::NoActiveKey,
            Self::DuplicateFingerprint => ErrorCode::DuplicateFingerprint,
            Self::UnknownSubject { .. } => ErrorCode::UnknownSubject,
            Self::Unavailable { .. } => ErrorCode::Unavailable,
            Self::Config { .. } => ErrorCode::Config,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Get retry-after duration if applicable
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Unavailable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Build an [`CredentialError::Unavailable`] tagged with the stage that failed
    pub fn unavailable(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            stage,
            reason: reason.into(),
            retry_after: Duration::from_secs(5),
        }
    }

    /// Build a [`CredentialError::Config`]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// From trait implementations for automatic error conversion
// ============================================================================

impl From<jsonwebtoken::errors::Error> for CredentialError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => CredentialError::Expired {
                expired_at: Utc::now(),
            },
            ErrorKind::InvalidSignature => CredentialError::BadSignature,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => CredentialError::Malformed {
                reason: err.to_string(),
            },
            ErrorKind::MissingRequiredClaim(claim) => CredentialError::Malformed {
                reason: format!("missing required claim: {claim}"),
            },
            _ => CredentialError::Malformed {
                reason: "credential validation failed".to_string(),
            },
        }
    }
}

impl From<StorageError> for CredentialError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Duplicate { .. } => CredentialError::DuplicateFingerprint,
            StorageError::Unavailable { reason } => CredentialError::Unavailable {
                stage: "storage",
                reason,
                retry_after: Duration::from_secs(5),
            },
            StorageError::Corrupt { reason } => {
                CredentialError::Internal(anyhow::anyhow!("corrupt stored data: {reason}"))
            }
        }
    }
}
