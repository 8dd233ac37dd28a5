//! Signing-key material: generation, lifecycle metadata and the
//! encoding/decoding halves handed to the token codec.

use crate::error::CredentialError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{self, KeyPair};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Asymmetric signing schemes supported for credential signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// ECDSA with P-256 and SHA-256
    Es256,
    /// Ed25519
    Ed25519,
}

impl KeyAlgorithm {
    /// Parse algorithm from string.
    pub fn from_str(s: &str) -> Result<Self, CredentialError> {
        match s.to_uppercase().as_str() {
            "ES256" => Ok(Self::Es256),
            "EDDSA" | "ED25519" => Ok(Self::Ed25519),
            _ => Err(CredentialError::config(format!(
                "Invalid signing algorithm: {}",
                s
            ))),
        }
    }

    /// Algorithm name as it appears in token headers.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Ed25519 => "EdDSA",
        }
    }

    /// The corresponding `jsonwebtoken` algorithm.
    #[must_use]
    pub const fn jwt_algorithm(&self) -> Algorithm {
        match self {
            Self::Es256 => Algorithm::ES256,
            Self::Ed25519 => Algorithm::EdDSA,
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private key material, base64-encoded PKCS#8 DER.
///
/// Held only by the issuing process. Zeroized on drop and redacted from
/// Debug output; deliberately not serializable so it cannot leak into a
/// stored row unsealed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateMaterial(String);

impl PrivateMaterial {
    /// Wrap base64-encoded PKCS#8 DER bytes.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Decode the PKCS#8 DER bytes, scrubbed on drop.
    pub fn der_bytes(&self) -> Result<Zeroizing<Vec<u8>>, CredentialError> {
        let bytes = STANDARD
            .decode(&self.0)
            .map_err(|e| CredentialError::Internal(anyhow::anyhow!("bad private material: {e}")))?;
        Ok(Zeroizing::new(bytes))
    }

    /// The base64 form, for sealing at rest.
    pub(crate) fn encoded(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PrivateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateMaterial(REDACTED)")
    }
}

/// A signing key with its lifecycle metadata.
///
/// Created by the rotation path only; issuance and validation are
/// read-only consumers.
#[derive(Debug, Clone)]
pub struct SigningKey {
    /// Stable opaque identifier, embedded in every token issued under
    /// this key; never reused
    pub kid: String,
    /// Signature scheme; immutable per key
    pub algorithm: KeyAlgorithm,
    private_material: PrivateMaterial,
    /// Verification half, base64-encoded, exposed to relying parties
    pub public_material: String,
    pub created_at: DateTime<Utc>,
    /// Set when this key was superseded
    pub rotated_at: Option<DateTime<Utc>>,
    /// At most one key is active at any instant
    pub is_active: bool,
    /// Why this key was superseded, set together with `rotated_at`
    pub rotation_reason: Option<String>,
}

impl SigningKey {
    /// Generate a fresh active key pair.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self, CredentialError> {
        let rng = SystemRandom::new();
        let (private_der, public_bytes) = match algorithm {
            KeyAlgorithm::Es256 => {
                let doc = signature::EcdsaKeyPair::generate_pkcs8(
                    &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
                    &rng,
                )
                .map_err(|e| {
                    CredentialError::Internal(anyhow::anyhow!("ECDSA generation failed: {e}"))
                })?;
                let pair = signature::EcdsaKeyPair::from_pkcs8(
                    &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
                    doc.as_ref(),
                    &rng,
                )
                .map_err(|e| {
                    CredentialError::Internal(anyhow::anyhow!("ECDSA key rejected: {e}"))
                })?;
                (doc.as_ref().to_vec(), pair.public_key().as_ref().to_vec())
            }
            KeyAlgorithm::Ed25519 => {
                let doc = signature::Ed25519KeyPair::generate_pkcs8(&rng).map_err(|e| {
                    CredentialError::Internal(anyhow::anyhow!("Ed25519 generation failed: {e}"))
                })?;
                let pair = signature::Ed25519KeyPair::from_pkcs8(doc.as_ref()).map_err(|e| {
                    CredentialError::Internal(anyhow::anyhow!("Ed25519 key rejected: {e}"))
                })?;
                (doc.as_ref().to_vec(), pair.public_key().as_ref().to_vec())
            }
        };

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm,
            private_material: PrivateMaterial::new(STANDARD.encode(private_der)),
            public_material: STANDARD.encode(public_bytes),
            created_at: Utc::now(),
            rotated_at: None,
            is_active: true,
            rotation_reason: None,
        })
    }

    /// Rebuild a key from stored fields.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        kid: String,
        algorithm: KeyAlgorithm,
        private_material: PrivateMaterial,
        public_material: String,
        created_at: DateTime<Utc>,
        rotated_at: Option<DateTime<Utc>>,
        is_active: bool,
        rotation_reason: Option<String>,
    ) -> Self {
        Self {
            kid,
            algorithm,
            private_material,
            public_material,
            created_at,
            rotated_at,
            is_active,
            rotation_reason,
        }
    }

    /// Mark this key superseded by a successor.
    pub fn mark_retired(&mut self, reason: impl Into<String>) {
        self.is_active = false;
        self.rotated_at = Some(Utc::now());
        self.rotation_reason = Some(reason.into());
    }

    /// The signing half, for the token codec.
    pub fn encoding_key(&self) -> Result<EncodingKey, CredentialError> {
        let der = self.private_material.der_bytes()?;
        let key = match self.algorithm {
            KeyAlgorithm::Es256 => EncodingKey::from_ec_der(&der),
            KeyAlgorithm::Ed25519 => EncodingKey::from_ed_der(&der),
        };
        Ok(key)
    }

    /// The verification half, safe to hand out.
    pub fn verification_key(&self) -> Result<VerificationKey, CredentialError> {
        let bytes = STANDARD.decode(&self.public_material).map_err(|e| {
            CredentialError::Internal(anyhow::anyhow!("bad public material: {e}"))
        })?;
        let decoding_key = match self.algorithm {
            KeyAlgorithm::Es256 => DecodingKey::from_ec_der(&bytes),
            KeyAlgorithm::Ed25519 => DecodingKey::from_ed_der(&bytes),
        };
        Ok(VerificationKey {
            kid: self.kid.clone(),
            algorithm: self.algorithm,
            decoding_key,
        })
    }

    /// Private material in its encoded form, for sealed persistence.
    pub(crate) fn private_material(&self) -> &PrivateMaterial {
        &self.private_material
    }
}

/// The public half of a signing key, resolved by `kid` at validation time.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    pub algorithm: KeyAlgorithm,
    pub(crate) decoding_key: DecodingKey,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_es256() {
        let key = SigningKey::generate(KeyAlgorithm::Es256).unwrap();
        assert!(!key.kid.is_empty());
        assert!(key.is_active);
        assert!(key.rotated_at.is_none());
        assert!(key.encoding_key().is_ok());
        assert!(key.verification_key().is_ok());
    }

    #[test]
    fn test_generate_ed25519() {
        let key = SigningKey::generate(KeyAlgorithm::Ed25519).unwrap();
        assert_eq!(key.algorithm, KeyAlgorithm::Ed25519);
        assert!(key.encoding_key().is_ok());
        assert!(key.verification_key().is_ok());
    }

    #[test]
    fn test_kids_are_unique() {
        let a = SigningKey::generate(KeyAlgorithm::Es256).unwrap();
        let b = SigningKey::generate(KeyAlgorithm::Es256).unwrap();
        assert_ne!(a.kid, b.kid);
    }

    #[test]
    fn test_debug_redacts_private_material() {
        let key = SigningKey::generate(KeyAlgorithm::Es256).unwrap();
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(key.private_material.encoded()));
    }

    #[test]
    fn test_mark_retired() {
        let mut key = SigningKey::generate(KeyAlgorithm::Es256).unwrap();
        key.mark_retired("scheduled");
        assert!(!key.is_active);
        assert!(key.rotated_at.is_some());
        assert_eq!(key.rotation_reason.as_deref(), Some("scheduled"));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            KeyAlgorithm::from_str("es256").unwrap(),
            KeyAlgorithm::Es256
        );
        assert_eq!(
            KeyAlgorithm::from_str("EdDSA").unwrap(),
            KeyAlgorithm::Ed25519
        );
        assert!(KeyAlgorithm::from_str("RS256").is_err());
    }
}
