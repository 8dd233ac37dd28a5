//! Background key rotation.
//!
//! A single task wakes on a fixed interval, asks the policy strategy
//! whether the active key is due, and rotates through the key store when
//! it is. Rotation failures are logged and retried on the next tick; the
//! previously active key keeps signing until a rotation actually lands.

use crate::config::{RotationPolicy, RotationStrategy};
use crate::error::CredentialError;
use crate::keys::{KeyAlgorithm, KeyStore, SigningKey};
use crate::metrics;
use crate::shutdown::ShutdownSignal;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Point-in-time view of the rotation schedule, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct RotationStatus {
    /// `kid` of the key currently signing
    pub current_key_id: String,
    /// Signature scheme of the active key
    pub algorithm: KeyAlgorithm,
    /// Strategy the background task evaluates
    pub strategy: String,
    /// When the current key became active
    pub rotated_at: DateTime<Utc>,
    /// Whole days since the current key became active
    pub days_since_rotation: i64,
    /// Next scheduled rotation; only the `time` strategy can date one
    pub next_rotation_due: Option<DateTime<Utc>>,
    /// Issuances under the current key
    pub issuances_since_rotation: u64,
    /// Retired keys still resolvable for outstanding credentials
    pub retired_keys: usize,
}

/// Drives scheduled key rotation and retired-key pruning.
pub struct RotationManager {
    keys: Arc<KeyStore>,
    policy: RotationPolicy,
    max_credential_ttl: Duration,
}

impl RotationManager {
    /// Build a manager over the key store.
    ///
    /// The longest credential TTL defaults to seven days, the stock
    /// refresh TTL; hosts issuing longer-lived credentials must raise it
    /// via [`with_max_credential_ttl`](Self::with_max_credential_ttl).
    pub fn new(keys: Arc<KeyStore>, policy: RotationPolicy) -> Self {
        RotationManager {
            keys,
            policy,
            max_credential_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Longest TTL any credential is issued with. Retired keys stay
    /// resolvable at least this long, so every outstanding token can be
    /// verified until it expires on its own.
    #[must_use]
    pub fn with_max_credential_ttl(mut self, ttl: Duration) -> Self {
        self.max_credential_ttl = ttl;
        self
    }

    /// Make sure an active key exists, creating the first one on a
    /// fresh store. Idempotent; call once at startup before serving.
    pub async fn bootstrap(&self) -> Result<Arc<SigningKey>, CredentialError> {
        if let Ok(active) = self.keys.get_active_key() {
            return Ok(active);
        }
        info!("no active signing key, creating the first one");
        let key = self.keys.activate_new_key("bootstrap").await?;
        metrics::record_key_rotation("bootstrap", "success");
        Ok(key)
    }

    /// Rotate immediately, outside the schedule.
    pub async fn rotate_now(&self, reason: &str) -> Result<Arc<SigningKey>, CredentialError> {
        let result = self.keys.activate_new_key(reason).await;
        match &result {
            Ok(_) => metrics::record_key_rotation(reason, "success"),
            Err(e) => {
                metrics::record_key_rotation(reason, "failure");
                warn!(error = %e, reason = reason, "manual rotation failed");
            }
        }
        result
    }

    /// Run the rotation loop until shutdown fires.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        if !self.policy.enabled {
            info!("key rotation disabled by policy");
            return;
        }
        info!(
            strategy = self.policy.strategy.as_str(),
            check_interval_secs = self.policy.check_interval.as_secs(),
            "key rotation task started"
        );

        let mut ticker = interval(self.policy.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("key rotation task stopping");
                    break;
                }
            }
        }
    }

    /// One evaluation pass: rotate if the strategy says so, then prune
    /// retired keys past the retention floor.
    async fn tick(&self) {
        let reason = match self.keys.get_active_key() {
            Ok(active) => self.due_reason(&active),
            // Nothing active yet; bring the store up rather than wait
            // for an operator
            Err(_) => Some("bootstrap"),
        };

        if let Some(reason) = reason {
            match self.keys.activate_new_key(reason).await {
                Ok(_) => metrics::record_key_rotation(reason, "success"),
                Err(e) => {
                    metrics::record_key_rotation(reason, "failure");
                    warn!(error = %e, reason = reason, "rotation attempt failed, retrying next tick");
                }
            }
        }

        if let Err(e) = self.keys.prune_retired(self.retention()).await {
            warn!(error = %e, "retired key prune failed");
        }
    }

    fn due_reason(&self, active: &SigningKey) -> Option<&'static str> {
        match self.policy.strategy {
            RotationStrategy::Time => {
                let age = Utc::now() - active.created_at;
                (age >= ChronoDuration::days(self.policy.interval_days)).then_some("scheduled")
            }
            RotationStrategy::Usage => (self.keys.issuance_count() >= self.policy.max_issuances)
                .then_some("usage_threshold"),
            RotationStrategy::Manual => None,
        }
    }

    /// How long a retired key must stay resolvable: every credential
    /// signed by it must outlive it, and never less than the configured
    /// overlap window.
    fn retention(&self) -> ChronoDuration {
        let ttl = ChronoDuration::from_std(self.max_credential_ttl)
            .unwrap_or_else(|_| ChronoDuration::days(7));
        ttl.max(ChronoDuration::minutes(self.policy.overlap_minutes))
    }

    /// Current schedule, derived from the active key and the policy.
    pub fn status(&self) -> Result<RotationStatus, CredentialError> {
        let ring = self.keys.ring();
        let active = ring.active().ok_or(CredentialError::NoActiveKey)?;

        let next_rotation_due = match self.policy.strategy {
            RotationStrategy::Time => {
                Some(active.created_at + ChronoDuration::days(self.policy.interval_days))
            }
            RotationStrategy::Usage | RotationStrategy::Manual => None,
        };

        Ok(RotationStatus {
            current_key_id: active.kid.clone(),
            algorithm: active.algorithm,
            strategy: self.policy.strategy.as_str().to_string(),
            rotated_at: active.created_at,
            days_since_rotation: (Utc::now() - active.created_at).num_days(),
            next_rotation_due,
            issuances_since_rotation: self.keys.issuance_count(),
            retired_keys: ring.len() - 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use crate::storage::{KeyStorage, MemoryStorage};

    fn setup(
        policy: RotationPolicy,
    ) -> (Arc<RotationManager>, Arc<KeyStore>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let keys = Arc::new(KeyStore::new(storage.clone(), KeyAlgorithm::Es256));
        let manager = Arc::new(RotationManager::new(keys.clone(), policy));
        (manager, keys, storage)
    }

    #[tokio::test]
    async fn test_bootstrap_creates_first_key_once() {
        let (manager, keys, _) = setup(RotationPolicy::default());

        let first = manager.bootstrap().await.unwrap();
        let second = manager.bootstrap().await.unwrap();
        assert_eq!(first.kid, second.kid);
        assert!(keys.get_active_key().is_ok());
    }

    #[tokio::test]
    async fn test_time_strategy_rotates_after_interval() {
        let policy = RotationPolicy::default()
            .with_strategy(RotationStrategy::Time)
            .with_interval_days(30);
        let (manager, keys, storage) = setup(policy);

        // Active key created 40 days ago
        let mut aged = SigningKey::generate(KeyAlgorithm::Es256).unwrap();
        aged.created_at = Utc::now() - ChronoDuration::days(40);
        storage.persist_rotation(&aged, None).await.unwrap();
        keys.load().await.unwrap();

        manager.tick().await;

        let active = keys.get_active_key().unwrap();
        assert_ne!(active.kid, aged.kid);
        // The old key stays resolvable for outstanding credentials
        assert!(keys.get_key_by_id(&aged.kid).is_ok());
        assert!(!keys.get_key_by_id(&aged.kid).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_time_strategy_leaves_young_key_alone() {
        let policy = RotationPolicy::default()
            .with_strategy(RotationStrategy::Time)
            .with_interval_days(30);
        let (manager, keys, _) = setup(policy);
        let first = manager.bootstrap().await.unwrap();

        manager.tick().await;
        assert_eq!(keys.get_active_key().unwrap().kid, first.kid);
    }

    #[tokio::test]
    async fn test_usage_strategy_rotates_at_threshold() {
        let policy = RotationPolicy::default()
            .with_strategy(RotationStrategy::Usage)
            .with_max_issuances(3);
        let (manager, keys, _) = setup(policy);
        let first = manager.bootstrap().await.unwrap();

        keys.record_issuance();
        keys.record_issuance();
        manager.tick().await;
        assert_eq!(keys.get_active_key().unwrap().kid, first.kid);

        keys.record_issuance();
        manager.tick().await;
        let rotated = keys.get_active_key().unwrap();
        assert_ne!(rotated.kid, first.kid);
        assert_eq!(keys.issuance_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_strategy_only_rotates_on_demand() {
        let policy = RotationPolicy::default().with_strategy(RotationStrategy::Manual);
        let (manager, keys, _) = setup(policy);
        let first = manager.bootstrap().await.unwrap();

        manager.tick().await;
        assert_eq!(keys.get_active_key().unwrap().kid, first.kid);

        let rotated = manager.rotate_now("manual").await.unwrap();
        assert_ne!(rotated.kid, first.kid);
        assert!(keys.get_key_by_id(&first.kid).is_ok());
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_active_key_and_retries() {
        let policy = RotationPolicy::default()
            .with_strategy(RotationStrategy::Usage)
            .with_max_issuances(1);
        let (manager, keys, storage) = setup(policy);
        let first = manager.bootstrap().await.unwrap();
        keys.record_issuance();

        storage.set_unavailable(true);
        manager.tick().await;
        assert_eq!(keys.get_active_key().unwrap().kid, first.kid);

        storage.set_unavailable(false);
        manager.tick().await;
        assert_ne!(keys.get_active_key().unwrap().kid, first.kid);
    }

    #[tokio::test]
    async fn test_retention_floor_is_max_of_ttl_and_overlap() {
        let (_, keys, _) = setup(RotationPolicy::default());

        let short_ttl = RotationManager::new(
            keys.clone(),
            RotationPolicy::default().with_overlap_minutes(60),
        )
        .with_max_credential_ttl(Duration::from_secs(120));
        assert_eq!(short_ttl.retention(), ChronoDuration::minutes(60));

        let long_ttl = RotationManager::new(
            keys,
            RotationPolicy::default().with_overlap_minutes(10),
        )
        .with_max_credential_ttl(Duration::from_secs(3600));
        assert_eq!(long_ttl.retention(), ChronoDuration::minutes(60));
    }

    #[tokio::test]
    async fn test_status_reports_schedule() {
        let policy = RotationPolicy::default()
            .with_strategy(RotationStrategy::Time)
            .with_interval_days(30);
        let (manager, keys, _) = setup(policy);
        manager.bootstrap().await.unwrap();
        keys.record_issuance();

        let status = manager.status().unwrap();
        assert_eq!(status.current_key_id, keys.get_active_key().unwrap().kid);
        assert_eq!(status.days_since_rotation, 0);
        assert_eq!(status.issuances_since_rotation, 1);
        assert_eq!(status.retired_keys, 0);
        assert!(status.next_rotation_due.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_status_has_no_due_date_outside_time_strategy() {
        let policy = RotationPolicy::default().with_strategy(RotationStrategy::Usage);
        let (manager, _, _) = setup(policy);
        manager.bootstrap().await.unwrap();

        assert!(manager.status().unwrap().next_rotation_due.is_none());
    }

    #[tokio::test]
    async fn test_status_without_active_key_fails() {
        let (manager, _, _) = setup(RotationPolicy::default());
        assert!(matches!(
            manager.status(),
            Err(CredentialError::NoActiveKey)
        ));
    }

    #[tokio::test]
    async fn test_run_loop_rotates_and_stops_on_shutdown() {
        let policy = RotationPolicy::default()
            .with_strategy(RotationStrategy::Time)
            .with_interval_days(0)
            .with_check_interval(Duration::from_millis(50));
        let (manager, keys, _) = setup(policy);
        manager.bootstrap().await.unwrap();
        let first = keys.get_active_key().unwrap().kid.clone();

        let coordinator = ShutdownCoordinator::new();
        let handle = tokio::spawn(manager.clone().run(coordinator.subscribe()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        coordinator.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task exits on shutdown")
            .unwrap();

        assert_ne!(keys.get_active_key().unwrap().kid, first);
    }

    #[tokio::test]
    async fn test_run_exits_immediately_when_disabled() {
        let policy = RotationPolicy::default().with_enabled(false);
        let (manager, _, _) = setup(policy);

        let coordinator = ShutdownCoordinator::new();
        let handle = tokio::spawn(manager.run(coordinator.subscribe()));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("disabled task returns at once")
            .unwrap();
    }
}
