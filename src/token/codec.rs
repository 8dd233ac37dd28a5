//! Credential encode/decode.
//!
//! Encoding serializes claims plus the signing key's `kid` into a signed,
//! self-contained token. Decoding parses the unsigned header to extract
//! `kid`, resolves the verification key through a caller-supplied lookup,
//! then verifies signature and expiry. The four decode failure kinds
//! (malformed, unknown key, bad signature, expired) stay distinct because
//! callers respond to them differently.

use crate::error::CredentialError;
use crate::keys::{SigningKey, VerificationKey};
use crate::token::claims::Claims;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Header, Validation};
use std::time::Duration;

/// Stateless claims-to-token codec.
///
/// CPU-bound only; never suspends.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    /// Clock-skew tolerance applied to expiry checks
    leeway: Duration,
}

impl Default for TokenCodec {
    fn default() -> Self {
        Self {
            leeway: Duration::from_secs(0),
        }
    }
}

impl TokenCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clock-skew tolerance for expiry checks.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Serialize claims into a signed token under the given key.
    ///
    /// The key's `kid` is stamped into both the header (for lookup) and
    /// the signed payload (so decoded claims are self-describing).
    pub fn encode(&self, claims: Claims, key: &SigningKey) -> Result<String, CredentialError> {
        let claims = claims.with_kid(&key.kid);
        let mut header = Header::new(key.algorithm.jwt_algorithm());
        header.kid = Some(key.kid.clone());

        let encoding_key = key.encoding_key()?;
        jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|e| CredentialError::Internal(anyhow::anyhow!("credential encoding failed: {e}")))
    }

    /// Parse and verify a token, resolving the key through `lookup`.
    ///
    /// The expected algorithm comes from the resolved key, never from the
    /// attacker-controlled header, so an algorithm-confusion attempt fails
    /// as malformed.
    pub fn decode<F>(&self, token: &str, lookup: F) -> Result<Claims, CredentialError>
    where
        F: FnOnce(&str) -> Option<VerificationKey>,
    {
        self.decode_inner(token, lookup, true)
    }

    /// Like [`TokenCodec::decode`] but skips the expiry check.
    ///
    /// Used on the revocation path, where the point is to revoke something
    /// that may already be near-expired. Signature verification still runs.
    pub fn decode_ignoring_expiry<F>(
        &self,
        token: &str,
        lookup: F,
    ) -> Result<Claims, CredentialError>
    where
        F: FnOnce(&str) -> Option<VerificationKey>,
    {
        self.decode_inner(token, lookup, false)
    }

    fn decode_inner<F>(
        &self,
        token: &str,
        lookup: F,
        check_expiry: bool,
    ) -> Result<Claims, CredentialError>
    where
        F: FnOnce(&str) -> Option<VerificationKey>,
    {
        let header = jsonwebtoken::decode_header(token).map_err(|e| CredentialError::Malformed {
            reason: format!("invalid header: {e}"),
        })?;

        let kid = header.kid.ok_or_else(|| CredentialError::Malformed {
            reason: "missing kid in header".to_string(),
        })?;

        let key = lookup(&kid).ok_or(CredentialError::UnknownKey { kid })?;

        let mut validation = Validation::new(key.algorithm.jwt_algorithm());
        validation.leeway = self.leeway.as_secs();
        validation.validate_exp = check_expiry;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        if !check_expiry {
            validation.required_spec_claims.clear();
        }

        match jsonwebtoken::decode::<Claims>(token, &key.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                let expired_at = peek_expiry(token).unwrap_or_else(Utc::now);
                Err(CredentialError::Expired { expired_at })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Best-effort read of the expiry claim without verifying anything.
///
/// Only used to enrich the `Expired` error after verification has already
/// failed on expiry.
fn peek_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Some(claims.expires_at())
}
