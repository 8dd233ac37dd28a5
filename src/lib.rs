//! Credential issuance, validation and key rotation.
//!
//! A host embeds four pieces: a [`KeyStore`] over persisted signing
//! keys, a [`RevocationLedger`] over issued-credential rows, a
//! [`CredentialAuthority`] that issues and checks tokens against both,
//! and a [`RotationManager`] that retires signing keys on a policy
//! schedule. Storage is pluggable through the [`storage`] traits, with
//! Redis and in-memory backends included.
//!
//! Validation is fail-closed: a credential with no ledger row is
//! treated as revoked, and a ledger that cannot be reached surfaces as
//! a retryable [`CredentialError::Unavailable`] rather than a verdict
//! on the credential.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod directory;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod metrics;
pub mod observability;
pub mod rotation;
pub mod shutdown;
pub mod storage;
pub mod token;

pub use authority::{CredentialAuthority, IssueRequest, TokenPair, VerificationKeyExport};
pub use config::{Config, RotationPolicy, RotationStrategy};
pub use directory::{DirectoryIdentity, IdentityDirectory, RoleProvider};
pub use error::{CredentialError, ErrorCode};
pub use keys::{KeyAlgorithm, KeyStore};
pub use ledger::RevocationLedger;
pub use rotation::{RotationManager, RotationStatus};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use token::{Claims, CredentialClass, Fingerprint};
