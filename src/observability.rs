//! Log setup for hosts embedding the credential service.
//!
//! The library itself only emits `tracing` events; a host that wants
//! them on stdout installs a subscriber once at startup via
//! [`LogOptions::init`]. A `RUST_LOG` environment variable overrides
//! the configured filter when present.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format and filtering for the host's subscriber.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Default filter directive when `RUST_LOG` is unset
    pub filter: String,
    /// Emit one JSON object per line instead of human-readable text
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl LogOptions {
    /// JSON lines, the shape log pipelines ingest.
    #[must_use]
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Default filter directive, e.g. `"credential_service=debug,info"`.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Install the global subscriber. Later calls are no-ops, so test
    /// binaries can call this from more than one place.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.filter));

        let registry = tracing_subscriber::registry().with(filter);
        if self.json {
            let _ = registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init();
        } else {
            let _ = registry.with(tracing_subscriber::fmt::layer()).try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LogOptions::default();
        assert_eq!(options.filter, "info");
        assert!(!options.json);
    }

    #[test]
    fn test_builders() {
        let options = LogOptions::default().with_json().with_filter("debug");
        assert!(options.json);
        assert_eq!(options.filter, "debug");
    }

    #[test]
    fn test_init_is_repeatable() {
        let options = LogOptions::default();
        options.init();
        options.init();
    }
}
