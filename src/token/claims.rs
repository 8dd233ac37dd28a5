use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Whether a credential grants access directly or only the right to
/// obtain a fresh pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CredentialClass {
    /// Short-lived credential presented on every request
    Access,
    /// Long-lived, one-time-use credential exchanged for a new pair
    Refresh,
}

impl CredentialClass {
    /// Class name as embedded in tokens and metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for CredentialClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried inside every issued credential.
///
/// `kid` is duplicated from the token header into the signed payload so
/// decoded claims are self-describing about which key produced them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    // Standard JWT claims
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,

    // Credential claims
    /// Human-readable subject label (e.g. email)
    pub label: String,
    /// Role names granted to the subject; order carries no meaning
    pub roles: Vec<String>,
    /// Access or refresh
    pub class: CredentialClass,
    /// Identifier of the signing key that produced this credential
    pub kid: String,
}

impl Claims {
    /// Build claims for a new credential expiring `ttl_seconds` from now.
    ///
    /// The `kid` starts empty; the codec stamps it when the signing key
    /// is known.
    pub fn new(
        issuer: String,
        subject: String,
        label: String,
        roles: Vec<String>,
        class: CredentialClass,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now().timestamp();
        Claims {
            iss: issuer,
            sub: subject,
            exp: now + ttl_seconds,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
            label,
            roles,
            class,
            kid: String::new(),
        }
    }

    /// Stamp the signing-key identifier into the payload.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = kid.into();
        self
    }

    pub fn is_expired(&self) -> bool {
        let now = Utc::now().timestamp();
        self.exp < now
    }

    /// Expiry as a UTC timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_creation() {
        let claims = Claims::new(
            "test-issuer".to_string(),
            "user-123".to_string(),
            "user@example.com".to_string(),
            vec!["admin".to_string()],
            CredentialClass::Access,
            900,
        );

        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.class, CredentialClass::Access);
        assert!(claims.has_role("admin"));
        assert!(!claims.has_role("auditor"));
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_negative_ttl_is_expired() {
        let claims = Claims::new(
            "test-issuer".to_string(),
            "user-123".to_string(),
            "user@example.com".to_string(),
            vec![],
            CredentialClass::Access,
            -60,
        );

        assert!(claims.is_expired());
    }

    #[test]
    fn test_class_serializes_lowercase() {
        let claims = Claims::new(
            "test-issuer".to_string(),
            "user-123".to_string(),
            "user@example.com".to_string(),
            vec!["viewer".to_string()],
            CredentialClass::Refresh,
            900,
        )
        .with_kid("key-1");

        let json = serde_json::to_string(&claims).unwrap();
        assert!(json.contains("\"class\":\"refresh\""));

        let back: Claims = serde_json::from_str(&json).unwrap();
        assert_eq!(back, claims);
        assert_eq!(back.kid, "key-1");
    }
}
