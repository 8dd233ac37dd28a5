//! Injected collaborator seams: the identity directory a host's login
//! flow consults, and the role source refresh re-reads.
//!
//! The core never stores identities or passwords. Hosts implement these
//! traits over whatever backs them; [`StaticDirectory`] is a fixed
//! in-memory implementation for tests and small deployments.

use crate::error::CredentialError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One identity row as the host's directory exposes it.
///
/// `password_hash` is opaque to this crate; verification happens in the
/// host's login flow.
#[derive(Debug, Clone)]
pub struct DirectoryIdentity {
    pub subject_id: String,
    pub label: String,
    pub password_hash: Option<String>,
}

/// Host-supplied identity lookup by login identifier.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// `None` when the login is unknown; errors are backend failures.
    async fn lookup(&self, login: &str) -> Result<Option<DirectoryIdentity>, CredentialError>;
}

/// Host-supplied role source.
///
/// Consulted again on every refresh so a role change lands in the next
/// access token instead of riding the old claims forward.
#[async_trait]
pub trait RoleProvider: Send + Sync {
    async fn roles_for(&self, subject_id: &str) -> Result<Vec<String>, CredentialError>;
}

/// Fixed in-memory directory, usable as both traits.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    identities: RwLock<HashMap<String, DirectoryIdentity>>,
    roles: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity under its login identifier.
    pub async fn add_identity(&self, login: impl Into<String>, identity: DirectoryIdentity) {
        self.identities.write().await.insert(login.into(), identity);
    }

    /// Set the roles for a subject, replacing any previous set.
    pub async fn set_roles(&self, subject_id: impl Into<String>, roles: Vec<String>) {
        self.roles.write().await.insert(subject_id.into(), roles);
    }

    /// Remove a subject's role entry, so it reads as unknown.
    pub async fn remove_subject(&self, subject_id: &str) {
        self.roles.write().await.remove(subject_id);
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn lookup(&self, login: &str) -> Result<Option<DirectoryIdentity>, CredentialError> {
        Ok(self.identities.read().await.get(login).cloned())
    }
}

#[async_trait]
impl RoleProvider for StaticDirectory {
    async fn roles_for(&self, subject_id: &str) -> Result<Vec<String>, CredentialError> {
        self.roles
            .read()
            .await
            .get(subject_id)
            .cloned()
            .ok_or_else(|| CredentialError::UnknownSubject {
                subject: subject_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_registered_identity() {
        let directory = StaticDirectory::new();
        directory
            .add_identity(
                "alice@example.com",
                DirectoryIdentity {
                    subject_id: "user-1".to_string(),
                    label: "Alice".to_string(),
                    password_hash: Some("$argon2id$stub".to_string()),
                },
            )
            .await;

        let found = directory.lookup("alice@example.com").await.unwrap();
        assert_eq!(found.unwrap().subject_id, "user-1");

        let missing = directory.lookup("bob@example.com").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_roles_for_unknown_subject_errors() {
        let directory = StaticDirectory::new();
        directory
            .set_roles("user-1", vec!["reader".to_string()])
            .await;

        let roles = directory.roles_for("user-1").await.unwrap();
        assert_eq!(roles, vec!["reader".to_string()]);

        let result = directory.roles_for("user-2").await;
        assert!(matches!(
            result,
            Err(CredentialError::UnknownSubject { subject }) if subject == "user-2"
        ));
    }

    #[tokio::test]
    async fn test_set_roles_replaces_previous_set() {
        let directory = StaticDirectory::new();
        directory
            .set_roles("user-1", vec!["reader".to_string()])
            .await;
        directory
            .set_roles("user-1", vec!["admin".to_string()])
            .await;

        let roles = directory.roles_for("user-1").await.unwrap();
        assert_eq!(roles, vec!["admin".to_string()]);
    }
}
