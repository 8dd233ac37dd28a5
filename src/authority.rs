//! The credential authority: issuance, validation, refresh and
//! revocation, orchestrated over the key store, codec and ledger.
//!
//! Every issued token leaves a ledger row before the caller sees it, and
//! every validation consults that row after the signature check. The
//! authority never swallows a stage failure; each distinct error kind
//! survives to the caller so transports can log and meter it before
//! collapsing everything to an unauthorized response.

use crate::config::Config;
use crate::directory::RoleProvider;
use crate::error::CredentialError;
use crate::keys::{KeyAlgorithm, KeyStore};
use crate::ledger::record::{IssuedCredential, SessionRecord};
use crate::ledger::RevocationLedger;
use crate::metrics;
use crate::token::{Claims, CredentialClass, Fingerprint, TokenCodec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

/// Parameters for one issuance.
///
/// TTL defaults to the configured value for the requested class; client
/// context (address, user agent) only feeds the advisory session row.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    subject_id: String,
    label: String,
    roles: Vec<String>,
    class: CredentialClass,
    ttl: Option<Duration>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl IssueRequest {
    /// Start a request for the given subject.
    pub fn new(subject_id: impl Into<String>, label: impl Into<String>) -> Self {
        IssueRequest {
            subject_id: subject_id.into(),
            label: label.into(),
            roles: Vec::new(),
            class: CredentialClass::Access,
            ttl: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Role names to embed in the credential.
    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    /// Credential class; ignored by [`CredentialAuthority::issue_pair`],
    /// which always issues both.
    #[must_use]
    pub fn with_class(mut self, class: CredentialClass) -> Self {
        self.class = class;
        self
    }

    /// Override the configured TTL for this issuance.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Client address, recorded on the session row.
    #[must_use]
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Client user agent, recorded on the session row.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Access and refresh credentials issued together.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Short-lived credential presented on every request
    pub access_token: String,
    /// One-time-use credential exchanged for the next pair
    pub refresh_token: String,
    /// When the access credential expires
    pub access_expires_at: DateTime<Utc>,
}

/// Public verification material for one signing key.
///
/// Served to relying parties that verify credentials on their own
/// instead of calling back in per request. Never carries private
/// material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationKeyExport {
    /// The key identifier tokens reference
    pub kid: String,
    /// Signature scheme of the key
    pub algorithm: KeyAlgorithm,
    /// Base64-encoded public key bytes
    pub public_material: String,
}

/// Issues, validates, refreshes and revokes credentials.
pub struct CredentialAuthority {
    keys: Arc<KeyStore>,
    ledger: Arc<RevocationLedger>,
    roles: Arc<dyn RoleProvider>,
    codec: TokenCodec,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    deadline: Duration,
}

impl CredentialAuthority {
    /// Build an authority over an already-loaded key store and ledger.
    pub fn new(
        config: &Config,
        keys: Arc<KeyStore>,
        ledger: Arc<RevocationLedger>,
        roles: Arc<dyn RoleProvider>,
    ) -> Self {
        CredentialAuthority {
            keys,
            ledger,
            roles,
            codec: TokenCodec::new().with_leeway(config.validation_leeway),
            issuer: config.issuer.clone(),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            deadline: config.operation_deadline,
        }
    }

    /// Issue one signed credential.
    ///
    /// The ledger row is written before the token leaves this call; if
    /// that write fails the whole issuance fails, since validation is
    /// fail-closed on a missing row. A request carrying client context
    /// also gets an advisory session row, recorded best-effort.
    pub async fn issue(&self, request: IssueRequest) -> Result<String, CredentialError> {
        let started = Instant::now();
        let ttl = request.ttl.unwrap_or_else(|| self.default_ttl(request.class));
        let result = self
            .issue_inner(
                &request.subject_id,
                &request.label,
                request.roles.clone(),
                request.class,
                ttl,
            )
            .await;
        metrics::record_operation_latency("issue", started.elapsed().as_secs_f64());

        let (token, expires_at) = result?;
        if request.ip_address.is_some() || request.user_agent.is_some() {
            self.record_session_best_effort(&request, Fingerprint::of(&token), expires_at)
                .await;
        }
        info!(
            subject_id = %request.subject_id,
            class = %request.class,
            "credential issued"
        );
        Ok(token)
    }

    /// Issue an access + refresh pair with one session row, the login
    /// flow's shape.
    ///
    /// The session row is advisory; a write failure or timeout there is
    /// logged and swallowed, never surfaced.
    pub async fn issue_pair(&self, request: IssueRequest) -> Result<TokenPair, CredentialError> {
        let started = Instant::now();
        let result = self.issue_pair_inner(&request).await;
        metrics::record_operation_latency("issue_pair", started.elapsed().as_secs_f64());
        result
    }

    async fn issue_pair_inner(
        &self,
        request: &IssueRequest,
    ) -> Result<TokenPair, CredentialError> {
        let access_ttl = request.ttl.unwrap_or(self.access_ttl);
        let (access_token, access_expires_at) = self
            .issue_inner(
                &request.subject_id,
                &request.label,
                request.roles.clone(),
                CredentialClass::Access,
                access_ttl,
            )
            .await?;
        let (refresh_token, refresh_expires_at) = self
            .issue_inner(
                &request.subject_id,
                &request.label,
                request.roles.clone(),
                CredentialClass::Refresh,
                self.refresh_ttl,
            )
            .await?;

        self.record_session_best_effort(
            request,
            Fingerprint::of(&refresh_token),
            refresh_expires_at,
        )
        .await;

        info!(subject_id = %request.subject_id, "credential pair issued");
        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
        })
    }

    /// Verify a presented credential and return its claims.
    ///
    /// Signature and expiry come first, keyed by the token's embedded
    /// `kid`; the revocation ledger is consulted only after the token
    /// proves authentic. A ledger row that is missing, revoked or
    /// expired fails with `Revoked`; a ledger that cannot be reached
    /// fails with `Unavailable`, never with a verdict.
    pub async fn validate(&self, token: &str) -> Result<Claims, CredentialError> {
        let started = Instant::now();
        let result = self.validate_inner(token).await;
        metrics::record_operation_latency("validate", started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => metrics::record_validation("success", "none"),
            Err(e) => {
                metrics::record_validation("failure", e.code().as_str());
                if matches!(e, CredentialError::BadSignature) {
                    metrics::record_security_event("bad_signature");
                    warn!("credential with invalid signature presented");
                }
            }
        }
        result
    }

    async fn validate_inner(&self, token: &str) -> Result<Claims, CredentialError> {
        let claims = self
            .codec
            .decode(token, |kid| self.keys.verification_key(kid))?;

        let fingerprint = Fingerprint::of(token);
        let revoked = self
            .bounded(
                "revocation check",
                self.ledger.is_revoked_or_unknown(&fingerprint),
            )
            .await?;
        if revoked {
            return Err(CredentialError::Revoked);
        }
        Ok(claims)
    }

    /// Exchange a refresh credential for a fresh pair.
    ///
    /// The presented token is consumed before the new pair is issued, so
    /// a captured refresh token can never be exchanged twice; if issuance
    /// fails after consumption the subject must authenticate again.
    /// Roles are re-read from the role provider so grants changed since
    /// login take effect now rather than at the next full login.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, CredentialError> {
        let started = Instant::now();
        let result = self.refresh_inner(refresh_token).await;
        metrics::record_operation_latency("refresh", started.elapsed().as_secs_f64());
        result
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<TokenPair, CredentialError> {
        let claims = match self.validate_inner(refresh_token).await {
            Ok(claims) => claims,
            Err(CredentialError::Revoked) => {
                // An already-consumed refresh token coming back is the
                // replay signal
                warn!("revoked refresh credential presented");
                metrics::record_security_event("refresh_replay");
                return Err(CredentialError::Revoked);
            }
            Err(e) => return Err(e),
        };

        if claims.class != CredentialClass::Refresh {
            return Err(CredentialError::WrongCredentialClass {
                expected: CredentialClass::Refresh,
                actual: claims.class,
            });
        }

        let fingerprint = Fingerprint::of(refresh_token);
        self.bounded("refresh consumption", self.ledger.revoke(&fingerprint))
            .await?;

        let roles = self
            .bounded("role lookup", self.roles.roles_for(&claims.sub))
            .await?;

        let (access_token, access_expires_at) = self
            .issue_inner(
                &claims.sub,
                &claims.label,
                roles.clone(),
                CredentialClass::Access,
                self.access_ttl,
            )
            .await?;
        let (new_refresh_token, _) = self
            .issue_inner(
                &claims.sub,
                &claims.label,
                roles,
                CredentialClass::Refresh,
                self.refresh_ttl,
            )
            .await?;

        info!(subject_id = %claims.sub, "credential pair refreshed");
        Ok(TokenPair {
            access_token,
            refresh_token: new_refresh_token,
            access_expires_at,
        })
    }

    /// Revoke one credential by its token string.
    ///
    /// The token must carry a valid signature, but expiry and prior
    /// revocation are not checked; the point is to revoke something that
    /// may already be near-expired. Idempotent.
    pub async fn revoke(&self, token: &str) -> Result<(), CredentialError> {
        let claims = self
            .codec
            .decode_ignoring_expiry(token, |kid| self.keys.verification_key(kid))?;

        let fingerprint = Fingerprint::of(token);
        self.bounded("revocation", self.ledger.revoke(&fingerprint))
            .await?;

        info!(subject_id = %claims.sub, class = %claims.class, "credential revoked by token");
        Ok(())
    }

    /// Revoke every live credential a subject holds ("log out
    /// everywhere"); returns how many were revoked.
    pub async fn revoke_all_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<u64, CredentialError> {
        self.bounded(
            "subject revocation",
            self.ledger.revoke_all_for_subject(subject_id),
        )
        .await
    }

    /// Public verification material for a key, active or retired.
    ///
    /// Lets a relying party verify credentials across a rotation without
    /// calling back in per request.
    pub fn verification_key(
        &self,
        kid: &str,
    ) -> Result<VerificationKeyExport, CredentialError> {
        let key = self.keys.get_key_by_id(kid)?;
        Ok(VerificationKeyExport {
            kid: key.kid.clone(),
            algorithm: key.algorithm,
            public_material: key.public_material.clone(),
        })
    }

    async fn issue_inner(
        &self,
        subject_id: &str,
        label: &str,
        roles: Vec<String>,
        class: CredentialClass,
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>), CredentialError> {
        let key = self.keys.get_active_key()?;

        let claims = Claims::new(
            self.issuer.clone(),
            subject_id.to_string(),
            label.to_string(),
            roles,
            class,
            ttl.as_secs() as i64,
        );
        let expires_at = claims.expires_at();
        let token = self.codec.encode(claims, &key)?;

        // Row before token: validation treats a missing row as revoked,
        // so a token without one must never leave this call
        let record = IssuedCredential::new(
            subject_id.to_string(),
            Fingerprint::of(&token),
            class,
            expires_at,
        );
        self.bounded("issuance record", self.ledger.record_issuance(&record))
            .await?;

        self.keys.record_issuance();
        metrics::record_credential_issued(class.as_str(), key.algorithm.as_str());
        Ok((token, expires_at))
    }

    /// Advisory session row; a write failure or timeout is logged and
    /// swallowed, never surfaced.
    async fn record_session_best_effort(
        &self,
        request: &IssueRequest,
        fingerprint: Fingerprint,
        expires_at: DateTime<Utc>,
    ) {
        let mut session = SessionRecord::new(request.subject_id.clone(), fingerprint, expires_at);
        if let Some(ip) = &request.ip_address {
            session = session.with_ip_address(ip.clone());
        }
        if let Some(user_agent) = &request.user_agent {
            session = session.with_user_agent(user_agent.clone());
        }
        if timeout(self.deadline, self.ledger.record_session(&session))
            .await
            .is_err()
        {
            warn!(subject_id = %request.subject_id, "session record timed out");
        }
    }

    fn default_ttl(&self, class: CredentialClass) -> Duration {
        match class {
            CredentialClass::Access => self.access_ttl,
            CredentialClass::Refresh => self.refresh_ttl,
        }
    }

    /// Bound a persistence-touching stage by the operation deadline.
    ///
    /// A timeout is an infrastructure failure, reported as `Unavailable`
    /// so callers never mistake it for a verdict on the credential.
    async fn bounded<T>(
        &self,
        stage: &'static str,
        operation: impl Future<Output = Result<T, CredentialError>>,
    ) -> Result<T, CredentialError> {
        match timeout(self.deadline, operation).await {
            Ok(result) => result,
            Err(_) => Err(CredentialError::unavailable(stage, "operation deadline exceeded")),
        }
    }
}
