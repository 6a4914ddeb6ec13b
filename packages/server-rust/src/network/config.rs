//! Message-bus configuration.

use crate::config::ConfigError;

/// URL scheme that selects the in-process bus.
pub const MEMORY_SCHEME: &str = "memory";

/// Settings for the bus connection.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// `nats://host:port` (or `tls://`) for a NATS server, `memory://` for the
    /// in-process bus.
    pub url: String,
    /// Capacity of each subscription's inbound queue. Messages beyond it are
    /// dropped for that subscriber.
    pub subscription_capacity: usize,
}

impl BusConfig {
    /// Scheme part of the URL, e.g. `nats` for `nats://localhost:4222`.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.url.split_once("://").map(|(scheme, _)| scheme)
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.scheme() == Some(MEMORY_SCHEME)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a URL without a known scheme or a
    /// zero queue capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.scheme() {
            Some(MEMORY_SCHEME | "nats" | "tls") => {}
            _ => {
                return Err(ConfigError::invalid(
                    "nats_url",
                    format!("{:?} is not a nats://, tls:// or memory:// url", self.url),
                ))
            }
        }
        if self.subscription_capacity == 0 {
            return Err(ConfigError::invalid("subscription capacity", "must be at least 1"));
        }
        Ok(())
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subscription_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_config_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.subscription_capacity, 1024);
        assert_eq!(config.scheme(), Some("nats"));
        assert!(!config.is_memory());
        config.validate().unwrap();
    }

    #[test]
    fn url_scheme_selects_the_bus() {
        let memory = BusConfig {
            url: "memory://".to_string(),
            ..BusConfig::default()
        };
        assert!(memory.is_memory());
        memory.validate().unwrap();

        for url in ["localhost:4222", "http://localhost", ""] {
            let config = BusConfig {
                url: url.to_string(),
                ..BusConfig::default()
            };
            assert!(config.validate().is_err(), "{url} should be rejected");
        }
    }
}
