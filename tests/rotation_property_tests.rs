//! Property-based tests for key rotation.
//!
//! Exactly one active key after any rotation sequence, issued tokens
//! outliving the key that signed them, counter reset, and pruning.

use credential_service::storage::{KeyStorage, MemoryStorage};
use credential_service::{
    Config, CredentialAuthority, CredentialError, IssueRequest, KeyAlgorithm, KeyStore,
    RevocationLedger, RotationManager, RotationPolicy, RotationStrategy, ShutdownCoordinator,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Generate arbitrary subject IDs.
fn arb_subject_id() -> impl Strategy<Value = String> {
    "[a-z0-9]{8,16}"
}

/// Generate rotation reasons an operator or strategy would supply.
fn arb_reason() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(vec![
        "scheduled",
        "usage_threshold",
        "manual",
        "incident_response",
    ])
}

fn test_config() -> Config {
    Config {
        issuer: "rotation-test".to_string(),
        algorithm: KeyAlgorithm::Es256,
        access_token_ttl: Duration::from_secs(900),
        refresh_token_ttl: Duration::from_secs(3600),
        validation_leeway: Duration::from_secs(0),
        operation_deadline: Duration::from_secs(2),
        rotation: RotationPolicy::default(),
        redis_url: String::new(),
        encryption_key: [0u8; 32],
    }
}

struct RotationStack {
    authority: CredentialAuthority,
    manager: Arc<RotationManager>,
    keys: Arc<KeyStore>,
    storage: Arc<MemoryStorage>,
}

async fn test_stack_with_policy(policy: RotationPolicy) -> RotationStack {
    let config = test_config();
    let storage = Arc::new(MemoryStorage::new());
    let keys = Arc::new(KeyStore::new(storage.clone(), config.algorithm));
    let ledger = Arc::new(RevocationLedger::new(storage.clone()));
    let directory = Arc::new(credential_service::directory::StaticDirectory::new());

    let manager = Arc::new(
        RotationManager::new(keys.clone(), policy)
            .with_max_credential_ttl(config.refresh_token_ttl),
    );
    manager.bootstrap().await.unwrap();

    let authority = CredentialAuthority::new(&config, keys.clone(), ledger, directory);
    RotationStack {
        authority,
        manager,
        keys,
        storage,
    }
}

async fn test_stack() -> RotationStack {
    test_stack_with_policy(RotationPolicy::default()).await
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// After any sequence of rotations, storage and the in-memory
    /// snapshot agree on exactly one active key, and every key the
    /// sequence produced is still resolvable by its `kid`.
    #[test]
    fn prop_exactly_one_active_key_after_rotations(
        rotations in 1usize..6,
        reason in arb_reason(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let stack = test_stack().await;
            let mut seen = vec![stack.keys.get_active_key().unwrap().kid.clone()];

            for _ in 0..rotations {
                let key = stack.manager.rotate_now(reason).await.unwrap();
                seen.push(key.kid.clone());

                let rows = stack.storage.load_keys().await.unwrap();
                let active_rows: Vec<_> = rows.iter().filter(|k| k.is_active).collect();
                prop_assert_eq!(active_rows.len(), 1);
                prop_assert_eq!(&active_rows[0].kid, seen.last().unwrap());
            }

            // No kid is ever reused
            let distinct: HashSet<_> = seen.iter().collect();
            prop_assert_eq!(distinct.len(), seen.len());

            // And every one of them still resolves
            for kid in &seen {
                prop_assert!(stack.keys.get_key_by_id(kid).is_ok());
            }
            prop_assert_eq!(stack.keys.ring().len(), rotations + 1);

            Ok(())
        })?;
    }

    /// A token stays verifiable for its whole TTL no matter how many
    /// rotations happen after it was issued, and its claims carry the
    /// `kid` it was signed under.
    #[test]
    fn prop_tokens_survive_every_rotation(
        subject_id in arb_subject_id(),
        rotations in 1usize..5,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let stack = test_stack().await;
            let mut issued: Vec<(String, String)> = Vec::new();

            for i in 0..=rotations {
                let kid = stack.keys.get_active_key().unwrap().kid.clone();
                let token = stack
                    .authority
                    .issue(IssueRequest::new(subject_id.as_str(), "subject@example.com"))
                    .await
                    .unwrap();
                issued.push((token, kid));

                if i < rotations {
                    stack.manager.rotate_now("scheduled").await.unwrap();
                }
            }

            for (token, kid) in &issued {
                let claims = stack.authority.validate(token).await.unwrap();
                prop_assert_eq!(&claims.kid, kid);
            }

            Ok(())
        })?;
    }

    /// The issuance counter always restarts at zero under a new key.
    #[test]
    fn prop_issuance_counter_resets_on_rotation(issuances in 1u64..50) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let stack = test_stack().await;

            for _ in 0..issuances {
                stack.keys.record_issuance();
            }
            prop_assert_eq!(stack.keys.issuance_count(), issuances);

            stack.manager.rotate_now("usage_threshold").await.unwrap();
            prop_assert_eq!(stack.keys.issuance_count(), 0);

            Ok(())
        })?;
    }

    /// Status always describes the key that is actually signing.
    #[test]
    fn prop_status_tracks_the_active_key(rotations in 1usize..5) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let stack = test_stack().await;
            for _ in 0..rotations {
                stack.manager.rotate_now("scheduled").await.unwrap();
            }

            let status = stack.manager.status().unwrap();
            let active = stack.keys.get_active_key().unwrap();
            prop_assert_eq!(&status.current_key_id, &active.kid);
            prop_assert_eq!(status.rotated_at, active.created_at);
            prop_assert_eq!(status.retired_keys, rotations);
            prop_assert_eq!(status.days_since_rotation, 0);

            Ok(())
        })?;
    }

    /// Pruning with a lapsed retention window leaves only the active
    /// key, in storage and in the snapshot.
    #[test]
    fn prop_prune_leaves_only_the_active_key(rotations in 1usize..5) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let stack = test_stack().await;
            for _ in 0..rotations {
                stack.manager.rotate_now("scheduled").await.unwrap();
            }
            let active_kid = stack.keys.ring().active().unwrap().kid.clone();

            tokio::time::sleep(Duration::from_millis(10)).await;
            let pruned = stack
                .keys
                .prune_retired(chrono::Duration::zero())
                .await
                .unwrap();
            prop_assert_eq!(pruned, rotations as u64);

            prop_assert_eq!(stack.keys.ring().len(), 1);
            prop_assert_eq!(stack.storage.load_keys().await.unwrap().len(), 1);
            // The survivor is the active key itself
            prop_assert_eq!(&stack.keys.get_active_key().unwrap().kid, &active_kid);

            Ok(())
        })?;
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[tokio::test]
    async fn usage_traffic_drives_background_rotation() {
        let policy = RotationPolicy::default()
            .with_strategy(RotationStrategy::Usage)
            .with_max_issuances(5)
            .with_check_interval(Duration::from_millis(50));
        let stack = test_stack_with_policy(policy).await;
        let first_kid = stack.keys.get_active_key().unwrap().kid.clone();

        let coordinator = ShutdownCoordinator::new();
        let handle = tokio::spawn(stack.manager.clone().run(coordinator.subscribe()));

        for _ in 0..5 {
            stack
                .authority
                .issue(IssueRequest::new("user-1", "user1@example.com"))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        coordinator.shutdown();
        handle.await.unwrap();

        // One rotation: the threshold was crossed once and the counter
        // restarted with the new key
        assert_ne!(stack.keys.get_active_key().unwrap().kid, first_kid);
        assert_eq!(stack.keys.ring().len(), 2);
        assert_eq!(stack.keys.issuance_count(), 0);
    }

    #[tokio::test]
    async fn background_loop_bootstraps_an_empty_store() {
        let storage = Arc::new(MemoryStorage::new());
        let keys = Arc::new(KeyStore::new(storage, KeyAlgorithm::Es256));
        let manager = Arc::new(RotationManager::new(
            keys.clone(),
            RotationPolicy::default().with_check_interval(Duration::from_millis(50)),
        ));

        let coordinator = ShutdownCoordinator::new();
        let handle = tokio::spawn(manager.run(coordinator.subscribe()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        coordinator.shutdown();
        handle.await.unwrap();

        assert!(keys.get_active_key().is_ok());
    }

    #[tokio::test]
    async fn rotation_failure_does_not_disturb_issuance() {
        let stack = test_stack().await;
        stack.storage.set_unavailable(true);

        let result = stack.manager.rotate_now("manual").await;
        assert!(matches!(result, Err(CredentialError::Unavailable { .. })));

        // The previous key kept signing
        stack.storage.set_unavailable(false);
        assert!(stack
            .authority
            .issue(IssueRequest::new("user-1", "user1@example.com"))
            .await
            .is_ok());
    }
}
