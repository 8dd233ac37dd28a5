//! Redis-backed storage. Signing-key rows are sealed with AES-256-GCM
//! before they leave the process; ledger rows carry their expiry as a
//! key TTL so the backend reaps them itself.

use super::{KeyStorage, LedgerStorage, StorageError};
use crate::error::CredentialError;
use crate::keys::{KeyAlgorithm, PrivateMaterial, SigningKey};
use crate::ledger::record::{IssuedCredential, SessionRecord};
use crate::token::Fingerprint;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

const KEY_INDEX: &str = "signing_keys";

fn key_row(kid: &str) -> String {
    format!("signing_key:{}", kid)
}

fn credential_row(fingerprint: &str) -> String {
    format!("credential:{}", fingerprint)
}

fn subject_index(subject_id: &str) -> String {
    format!("subject_credentials:{}", subject_id)
}

fn session_row(id: &str) -> String {
    format!("session:{}", id)
}

fn corrupt(e: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        reason: e.to_string(),
    }
}

/// Seconds until `expires_at`, floored at one so `SETEX` stays valid.
fn remaining_ttl(expires_at: DateTime<Utc>) -> u64 {
    (expires_at - Utc::now()).num_seconds().max(1) as u64
}

impl From<redis::RedisError> for StorageError {
    fn from(e: redis::RedisError) -> Self {
        StorageError::Unavailable {
            reason: e.to_string(),
        }
    }
}

/// At-rest form of a signing-key row.
///
/// The private half is sealed with AES-256-GCM under the service
/// encryption key; the `kid` rides along as AAD so a sealed blob cannot
/// be replayed into another key's row.
#[derive(Debug, Serialize, Deserialize)]
struct SealedKeyRecord {
    kid: String,
    algorithm: KeyAlgorithm,
    sealed_private: String,
    public_material: String,
    created_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
    is_active: bool,
    rotation_reason: Option<String>,
}

impl SealedKeyRecord {
    fn seal(key: &SigningKey, encryption_key: &[u8; 32]) -> Result<Self, StorageError> {
        let sealed_private = seal_private(encryption_key, &key.kid, key.private_material())?;
        Ok(SealedKeyRecord {
            kid: key.kid.clone(),
            algorithm: key.algorithm,
            sealed_private,
            public_material: key.public_material.clone(),
            created_at: key.created_at,
            rotated_at: key.rotated_at,
            is_active: key.is_active,
            rotation_reason: key.rotation_reason.clone(),
        })
    }

    fn unseal(self, encryption_key: &[u8; 32]) -> Result<SigningKey, StorageError> {
        let private = unseal_private(encryption_key, &self.kid, &self.sealed_private)?;
        Ok(SigningKey::from_parts(
            self.kid,
            self.algorithm,
            private,
            self.public_material,
            self.created_at,
            self.rotated_at,
            self.is_active,
            self.rotation_reason,
        ))
    }
}

fn seal_private(
    encryption_key: &[u8; 32],
    kid: &str,
    material: &PrivateMaterial,
) -> Result<String, StorageError> {
    let cipher = Aes256Gcm::new_from_slice(encryption_key)
        .map_err(|e| corrupt(format!("sealing key rejected: {}", e)))?;

    let mut nonce_bytes = [0u8; 12];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| corrupt("nonce generation failed"))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: material.encoded().as_bytes(),
                aad: kid.as_bytes(),
            },
        )
        .map_err(|e| corrupt(format!("seal failed: {}", e)))?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

fn unseal_private(
    encryption_key: &[u8; 32],
    kid: &str,
    sealed: &str,
) -> Result<PrivateMaterial, StorageError> {
    let bytes = STANDARD
        .decode(sealed)
        .map_err(|e| corrupt(format!("sealed material not base64: {}", e)))?;
    if bytes.len() < 12 {
        return Err(corrupt("sealed material shorter than nonce"));
    }
    let (nonce_bytes, ciphertext) = bytes.split_at(12);

    let cipher = Aes256Gcm::new_from_slice(encryption_key)
        .map_err(|e| corrupt(format!("sealing key rejected: {}", e)))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: kid.as_bytes(),
            },
        )
        .map_err(|_| corrupt(format!("unseal failed for key {}", kid)))?;

    let encoded = String::from_utf8(plaintext)
        .map_err(|_| corrupt("unsealed material not valid UTF-8"))?;
    Ok(PrivateMaterial::new(encoded))
}

pub struct RedisStorage {
    conn: Arc<RwLock<ConnectionManager>>,
    encryption_key: [u8; 32],
}

impl RedisStorage {
    pub async fn new(redis_url: &str, encryption_key: [u8; 32]) -> Result<Self, CredentialError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CredentialError::config(format!("invalid redis url: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CredentialError::unavailable("redis", e.to_string()))?;

        Ok(RedisStorage {
            conn: Arc::new(RwLock::new(conn)),
            encryption_key,
        })
    }
}

#[async_trait]
impl KeyStorage for RedisStorage {
    async fn load_keys(&self) -> Result<Vec<SigningKey>, StorageError> {
        let mut conn = self.conn.write().await;
        let kids: Vec<String> = conn.smembers(KEY_INDEX).await?;

        let mut keys = Vec::with_capacity(kids.len());
        for kid in kids {
            let value: Option<String> = conn.get(key_row(&kid)).await?;
            // An index member without a row was pruned concurrently
            let Some(value) = value else { continue };
            let record: SealedKeyRecord = serde_json::from_str(&value)
                .map_err(|e| corrupt(format!("key row {}: {}", kid, e)))?;
            keys.push(record.unseal(&self.encryption_key)?);
        }

        Ok(keys)
    }

    async fn persist_rotation(
        &self,
        new_active: &SigningKey,
        retired: Option<&SigningKey>,
    ) -> Result<(), StorageError> {
        let new_row = serde_json::to_string(&SealedKeyRecord::seal(
            new_active,
            &self.encryption_key,
        )?)
        .map_err(corrupt)?;

        // One MULTI/EXEC so no reader can observe the new active key
        // without the predecessor's deactivation
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(key_row(&new_active.kid), new_row).ignore();
        pipe.sadd(KEY_INDEX, &new_active.kid).ignore();

        if let Some(retired) = retired {
            let retired_row = serde_json::to_string(&SealedKeyRecord::seal(
                retired,
                &self.encryption_key,
            )?)
            .map_err(corrupt)?;
            pipe.set(key_row(&retired.kid), retired_row).ignore();
        }

        let mut conn = self.conn.write().await;
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn delete_key(&self, kid: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.write().await;
        conn.del::<_, ()>(key_row(kid)).await?;
        conn.srem::<_, _, ()>(KEY_INDEX, kid).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStorage for RedisStorage {
    async fn insert_credential(&self, record: &IssuedCredential) -> Result<(), StorageError> {
        let row_key = credential_row(record.fingerprint.as_str());
        let value = serde_json::to_string(record).map_err(corrupt)?;
        let ttl = remaining_ttl(record.expires_at);

        let mut conn = self.conn.write().await;
        let exists: bool = conn.exists(&row_key).await?;
        if exists {
            return Err(StorageError::Duplicate { key: row_key });
        }

        conn.set_ex::<_, _, ()>(&row_key, &value, ttl).await?;
        conn.sadd::<_, _, ()>(
            subject_index(&record.subject_id),
            record.fingerprint.as_str(),
        )
        .await?;
        Ok(())
    }

    async fn find_credential(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<IssuedCredential>, StorageError> {
        let mut conn = self.conn.write().await;
        let value: Option<String> = conn.get(credential_row(fingerprint.as_str())).await?;

        match value {
            Some(v) => {
                let record: IssuedCredential = serde_json::from_str(&v).map_err(corrupt)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn mark_revoked(&self, fingerprint: &Fingerprint) -> Result<(), StorageError> {
        let row_key = credential_row(fingerprint.as_str());
        let mut conn = self.conn.write().await;

        let value: Option<String> = conn.get(&row_key).await?;
        let Some(value) = value else { return Ok(()) };

        let mut record: IssuedCredential = serde_json::from_str(&value).map_err(corrupt)?;
        if record.is_revoked() {
            return Ok(());
        }
        record.revoke();

        let updated = serde_json::to_string(&record).map_err(corrupt)?;
        conn.set_ex::<_, _, ()>(&row_key, &updated, remaining_ttl(record.expires_at))
            .await?;
        Ok(())
    }

    async fn revoke_all_for_subject(&self, subject_id: &str) -> Result<u64, StorageError> {
        let index_key = subject_index(subject_id);
        let mut conn = self.conn.write().await;
        let fingerprints: Vec<String> = conn.smembers(&index_key).await?;

        let mut revoked = 0u64;
        for fp in fingerprints {
            let row_key = credential_row(&fp);
            let value: Option<String> = conn.get(&row_key).await?;
            let Some(value) = value else {
                // Row lapsed; drop the stale index member
                conn.srem::<_, _, ()>(&index_key, &fp).await?;
                continue;
            };

            let mut record: IssuedCredential = serde_json::from_str(&value).map_err(corrupt)?;
            if record.is_revoked() {
                continue;
            }
            record.revoke();

            let updated = serde_json::to_string(&record).map_err(corrupt)?;
            conn.set_ex::<_, _, ()>(&row_key, &updated, remaining_ttl(record.expires_at))
                .await?;
            revoked += 1;
        }

        Ok(revoked)
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let value = serde_json::to_string(session).map_err(corrupt)?;
        let ttl = remaining_ttl(session.expires_at);

        let mut conn = self.conn.write().await;
        conn.set_ex::<_, _, ()>(session_row(&session.id), &value, ttl)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        // Credential and session rows expire via their TTL; this sweep
        // only clears subject-index members whose rows have lapsed.
        let mut conn = self.conn.write().await;

        let index_keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>("subject_credentials:*")
                .await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut removed = 0u64;
        for index_key in index_keys {
            let members: Vec<String> = conn.smembers(&index_key).await?;
            for fp in members {
                let exists: bool = conn.exists(credential_row(&fp)).await?;
                if !exists {
                    conn.srem::<_, _, ()>(&index_key, &fp).await?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}
