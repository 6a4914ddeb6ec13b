use std::time::Duration;

use crate::config::ConfigError;

/// Configuration for the resource service.
///
/// Controls the service root, the worker pool, and request/event timing.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of every resource identifier the service owns (e.g. `"saltychat"`).
    pub name: String,
    /// Depth of the bounded queue between the bus readers and the workers.
    pub in_channel_size: usize,
    /// Number of worker tasks draining the queue.
    pub worker_count: usize,
    /// Upper bound on a single handler invocation.
    pub request_timeout: Duration,
    /// How long a query event keeps answering query requests.
    pub query_event_duration: Duration,
}

impl ServiceConfig {
    /// Checks the configuration before anything is started.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(['.', '*', '>', ' ']) {
            return Err(ConfigError::invalid(
                "service.name",
                "must be a single non-empty token",
            ));
        }
        if self.in_channel_size == 0 {
            return Err(ConfigError::invalid("service.in_channel_size", "must be at least 1"));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::invalid("service.worker_count", "must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("service.request_timeout", "must be non-zero"));
        }
        if self.query_event_duration.is_zero() {
            return Err(ConfigError::invalid(
                "service.query_event_duration",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "saltychat".to_string(),
            in_channel_size: 1024,
            worker_count: 32,
            request_timeout: Duration::from_secs(10),
            query_event_duration: Duration::from_secs(3),
        }
    }
}
