use std::time::Duration;

use crate::config::ConfigError;
use crate::network::is_valid_subject;

/// Settings for the [`HealthSupervisor`](super::HealthSupervisor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// When `false` the supervisor is not started.
    pub enabled: bool,
    /// Time between two check rounds.
    pub interval: Duration,
    /// Upper bound for a single check.
    pub timeout: Duration,
    /// Subject answering health requests with the latest report.
    pub subject: String,
    /// Subject every report is published on.
    pub status_topic: String,
    pub service_name: String,
    pub environment: String,
    pub version: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            subject: "health".to_string(),
            status_topic: "health.status".to_string(),
            service_name: "saltychat".to_string(),
            environment: "development".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl HealthConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero interval or timeout, or a
    /// subject that cannot be published on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("health check interval", "must be non-zero"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("health check timeout", "must be non-zero"));
        }
        if !is_valid_subject(&self.subject) {
            return Err(ConfigError::invalid(
                "health check subject",
                format!("{:?} is not a valid subject", self.subject),
            ));
        }
        if !is_valid_subject(&self.status_topic) {
            return Err(ConfigError::invalid(
                "health check status topic",
                format!("{:?} is not a valid subject", self.status_topic),
            ));
        }
        Ok(())
    }
}
