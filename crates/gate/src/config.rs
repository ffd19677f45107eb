//! Configuration loading and validation for the `gate` binary.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any variable is invalid.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated self-test configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name of the key used for the round trip.
    #[serde(default = "default_key_name")]
    pub key_name: String,

    /// Whether a newly generated key is revoked by enrollment changes.
    #[serde(default = "default_key_invalidated_by_enrollment")]
    pub key_invalidated_by_enrollment: bool,

    /// Plaintext encrypted and then decrypted by the self-test.
    #[serde(default = "default_self_test_payload")]
    pub self_test_payload: String,

    /// Comma-separated ids of the simulated enrolled biometrics.
    #[serde(default = "default_enrollments")]
    pub enrollments: String,

    /// OTLP endpoint for span export. Logs only when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_key_name() -> String {
    "gate-default-key".into()
}
fn default_key_invalidated_by_enrollment() -> bool {
    true
}
fn default_self_test_payload() -> String {
    "gate self-test".into()
}
fn default_enrollments() -> String {
    "finger-1".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Enrollment ids parsed from [`Config::enrollments`].
    pub fn enrollment_ids(&self) -> Vec<String> {
        self.enrollments
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// OTLP endpoint, treating a blank value as unset.
    pub fn otlp_endpoint(&self) -> Option<&str> {
        self.otel_exporter_otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.key_name, "KEY_NAME")?;
        ensure_non_empty(&self.self_test_payload, "SELF_TEST_PAYLOAD")?;
        ensure_non_empty(&self.log_level, "LOG_LEVEL")?;
        if self.enrollment_ids().is_empty() {
            anyhow::bail!("ENROLLMENTS must name at least one enrolled biometric");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
