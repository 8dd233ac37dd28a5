//! Centralized configuration for the credential service.
//!
//! All configuration is loaded from environment variables and validated
//! at startup. Rotation policy is read once here; changing it requires a
//! restart, never live mutation mid-rotation-cycle.

use crate::error::CredentialError;
use crate::keys::KeyAlgorithm;
use std::env;
use std::time::Duration;

/// When and why signing keys rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// Rotate when the active key's age exceeds `interval_days`
    Time,
    /// Rotate when issuances under the active key exceed `max_issuances`
    Usage,
    /// Never rotate automatically; only explicit triggers
    Manual,
}

impl RotationStrategy {
    /// Parse strategy from string.
    pub fn from_str(s: &str) -> Result<Self, CredentialError> {
        match s.to_lowercase().as_str() {
            "time" => Ok(Self::Time),
            "usage" => Ok(Self::Usage),
            "manual" => Ok(Self::Manual),
            _ => Err(CredentialError::config(format!(
                "Invalid rotation strategy: {}",
                s
            ))),
        }
    }

    /// Strategy name for logs and status output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Usage => "usage",
            Self::Manual => "manual",
        }
    }
}

/// Signing-key rotation policy.
///
/// Read at startup and never mutated by the subsystem at runtime.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Whether the background rotation task runs at all
    pub enabled: bool,
    /// Which trigger the task evaluates on each tick
    pub strategy: RotationStrategy,
    /// Maximum active-key age for the `time` strategy
    pub interval_days: i64,
    /// Maximum issuances under one key for the `usage` strategy
    pub max_issuances: u64,
    /// Minimum retention floor for retired keys, in case TTLs are misconfigured
    pub overlap_minutes: i64,
    /// How often the background task wakes to evaluate the strategy
    pub check_interval: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RotationStrategy::Time,
            interval_days: 30,
            max_issuances: 100_000,
            overlap_minutes: 10,
            check_interval: Duration::from_secs(3600),
        }
    }
}

impl RotationPolicy {
    /// Set the rotation strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: RotationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the time-based rotation interval in days.
    #[must_use]
    pub fn with_interval_days(mut self, days: i64) -> Self {
        self.interval_days = days;
        self
    }

    /// Set the usage-based issuance ceiling.
    #[must_use]
    pub fn with_max_issuances(mut self, max: u64) -> Self {
        self.max_issuances = max;
        self
    }

    /// Set the minimum retired-key retention floor in minutes.
    #[must_use]
    pub fn with_overlap_minutes(mut self, minutes: i64) -> Self {
        self.overlap_minutes = minutes;
        self
    }

    /// Set how often the background task evaluates the strategy.
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Enable or disable the background rotation task.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Credential service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Token settings
    /// Issuer claim embedded in every credential
    pub issuer: String,
    /// Signing algorithm for newly generated keys
    pub algorithm: KeyAlgorithm,
    /// Access credential TTL
    pub access_token_ttl: Duration,
    /// Refresh credential TTL
    pub refresh_token_ttl: Duration,
    /// Clock-skew tolerance applied to expiry checks
    pub validation_leeway: Duration,

    // Operation settings
    /// Default deadline covering persistence I/O in issue/validate calls
    pub operation_deadline: Duration,

    // Rotation
    /// Signing-key rotation policy
    pub rotation: RotationPolicy,

    // Storage
    /// Redis connection URL for the durable backend
    pub redis_url: String,

    // Security
    /// Encryption key for private material at rest (32 bytes for AES-256)
    pub encryption_key: [u8; 32],
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, CredentialError> {
        dotenvy::dotenv().ok();

        let issuer = env::var("CREDENTIAL_ISSUER").unwrap_or_else(|_| "auth-platform".to_string());
        let algorithm = KeyAlgorithm::from_str(
            &env::var("SIGNING_ALGORITHM").unwrap_or_else(|_| "ES256".to_string()),
        )?;
        let access_token_ttl = Duration::from_secs(parse_env("ACCESS_TOKEN_TTL", 900)?);
        let refresh_token_ttl = Duration::from_secs(parse_env("REFRESH_TOKEN_TTL", 604_800)?);
        let validation_leeway = Duration::from_secs(parse_env("VALIDATION_LEEWAY", 0)?);

        let operation_deadline = Duration::from_secs(parse_env("OPERATION_DEADLINE", 5)?);

        let rotation = RotationPolicy {
            enabled: parse_env("ROTATION_ENABLED", true)?,
            strategy: RotationStrategy::from_str(
                &env::var("ROTATION_STRATEGY").unwrap_or_else(|_| "time".to_string()),
            )?,
            interval_days: parse_env("ROTATION_INTERVAL_DAYS", 30)?,
            max_issuances: parse_env("ROTATION_MAX_ISSUANCES", 100_000)?,
            overlap_minutes: parse_env("ROTATION_OVERLAP_MINUTES", 10)?,
            check_interval: Duration::from_secs(parse_env("ROTATION_CHECK_INTERVAL", 3600)?),
        };

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let encryption_key = parse_encryption_key()?;

        Ok(Self {
            issuer,
            algorithm,
            access_token_ttl,
            refresh_token_ttl,
            validation_leeway,
            operation_deadline,
            rotation,
            redis_url,
            encryption_key,
        })
    }
}

/// Parse environment variable with default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, CredentialError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| CredentialError::config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

/// Parse encryption key from environment.
fn parse_encryption_key() -> Result<[u8; 32], CredentialError> {
    match env::var("ENCRYPTION_KEY") {
        Ok(key) => {
            let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &key)
                .map_err(|e| CredentialError::config(format!("Invalid ENCRYPTION_KEY: {}", e)))?;

            if bytes.len() != 32 {
                return Err(CredentialError::config(format!(
                    "ENCRYPTION_KEY must be 32 bytes, got {}",
                    bytes.len()
                )));
            }

            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes);
            Ok(arr)
        }
        Err(_) => {
            // Generate random key for development
            use ring::rand::SecureRandom;
            let rng = ring::rand::SystemRandom::new();
            let mut key = [0u8; 32];
            rng.fill(&mut key)
                .map_err(|_| CredentialError::config("Failed to generate development key"))?;
            Ok(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_strategy_parsing() {
        assert_eq!(
            RotationStrategy::from_str("time").unwrap(),
            RotationStrategy::Time
        );
        assert_eq!(
            RotationStrategy::from_str("USAGE").unwrap(),
            RotationStrategy::Usage
        );
        assert_eq!(
            RotationStrategy::from_str("Manual").unwrap(),
            RotationStrategy::Manual
        );
        assert!(RotationStrategy::from_str("weekly").is_err());
    }

    #[test]
    fn test_rotation_policy_builder() {
        let policy = RotationPolicy::default()
            .with_strategy(RotationStrategy::Usage)
            .with_max_issuances(10)
            .with_overlap_minutes(5)
            .with_check_interval(Duration::from_millis(50));

        assert!(policy.enabled);
        assert_eq!(policy.strategy, RotationStrategy::Usage);
        assert_eq!(policy.max_issuances, 10);
        assert_eq!(policy.overlap_minutes, 5);
        assert_eq!(policy.check_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars
        env::remove_var("CREDENTIAL_ISSUER");
        env::remove_var("SIGNING_ALGORITHM");
        env::remove_var("ACCESS_TOKEN_TTL");
        env::remove_var("ROTATION_STRATEGY");

        let config = Config::from_env().unwrap();

        assert_eq!(config.issuer, "auth-platform");
        assert_eq!(config.algorithm, KeyAlgorithm::Es256);
        assert_eq!(config.access_token_ttl, Duration::from_secs(900));
        assert_eq!(config.validation_leeway, Duration::from_secs(0));
        assert_eq!(config.rotation.strategy, RotationStrategy::Time);
        assert_eq!(config.rotation.interval_days, 30);
    }
}
