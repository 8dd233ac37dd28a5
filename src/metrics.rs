//! Prometheus metrics for the credential service.
//!
//! Provides counters and histograms for observability.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

/// Credentials issued counter.
pub static CREDENTIALS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credential_service_issued_total",
        "Total number of credentials issued",
        &["class", "algorithm"]
    )
    .expect("Failed to register issued metric")
});

/// Credential validations counter.
pub static CREDENTIALS_VALIDATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credential_service_validations_total",
        "Total number of credential validations",
        &["status", "error_code"]
    )
    .expect("Failed to register validations metric")
});

/// Credentials revoked counter.
pub static CREDENTIALS_REVOKED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credential_service_revoked_total",
        "Total number of credentials revoked",
        &["reason"]
    )
    .expect("Failed to register revoked metric")
});

/// Key rotations counter.
pub static KEY_ROTATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credential_service_key_rotations_total",
        "Total number of signing-key rotations",
        &["reason", "status"]
    )
    .expect("Failed to register key_rotations metric")
});

/// Operation latency histogram.
pub static OPERATION_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "credential_service_operation_latency_seconds",
        "Credential operation latency in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register operation_latency metric")
});

/// Security events counter.
pub static SECURITY_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credential_service_security_events_total",
        "Total number of security events",
        &["event_type"]
    )
    .expect("Failed to register security_events metric")
});

/// Record a credential issuance.
pub fn record_credential_issued(class: &str, algorithm: &str) {
    CREDENTIALS_ISSUED
        .with_label_values(&[class, algorithm])
        .inc();
}

/// Record a credential validation outcome.
pub fn record_validation(status: &str, error_code: &str) {
    CREDENTIALS_VALIDATED
        .with_label_values(&[status, error_code])
        .inc();
}

/// Record a credential revocation.
pub fn record_revocation(reason: &str) {
    CREDENTIALS_REVOKED.with_label_values(&[reason]).inc();
}

/// Record a key rotation attempt.
pub fn record_key_rotation(reason: &str, status: &str) {
    KEY_ROTATIONS.with_label_values(&[reason, status]).inc();
}

/// Record operation latency.
pub fn record_operation_latency(operation: &str, duration_secs: f64) {
    OPERATION_LATENCY
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Record a security event.
pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}
