//! Process configuration, read from flags and `APP_*` environment variables.

use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use crate::health::HealthConfig;
use crate::lifecycle::LifecycleConfig;
use crate::logging::LogConfig;
use crate::network::BusConfig;
use crate::service::ServiceConfig;

/// Errors raised while validating configuration or building the handler table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid resource pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("{kind} handler already registered for {pattern}")]
    DuplicateHandler { pattern: String, kind: &'static str },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn duplicate(pattern: impl Into<String>, kind: &'static str) -> Self {
        Self::DuplicateHandler {
            pattern: pattern.into(),
            kind,
        }
    }
}

/// Which store implementation backs the resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "saltychat-server", version, about = "Resource service for encrypted chat rooms")]
pub struct AppConfig {
    /// Address of the message bus: `nats://host:port`, `tls://host:port`, or
    /// `memory://` for an in-process bus nobody else can reach.
    #[arg(long, env = "APP_NATS_URL", default_value = "nats://localhost:4222")]
    pub nats_url: String,

    /// Root token of every resource identifier.
    #[arg(long, env = "APP_SERVICE_NAME", default_value = "saltychat")]
    pub service_name: String,

    #[arg(long, env = "APP_SERVICE_IN_CHANNEL_SIZE", default_value_t = 1024)]
    pub in_channel_size: usize,

    #[arg(long, env = "APP_SERVICE_WORKER_COUNT", default_value_t = 32)]
    pub worker_count: usize,

    #[arg(long, env = "APP_SHUTDOWN_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub shutdown_timeout: Duration,

    #[arg(long, env = "APP_REQUEST_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub request_timeout: Duration,

    #[arg(long, env = "APP_QUERY_EVENT_DURATION", default_value = "3s", value_parser = parse_duration)]
    pub query_event_duration: Duration,

    /// `json` or `text`.
    #[arg(long, env = "APP_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// `trace`, `debug`, `info`, `warn` or `error`.
    #[arg(long, env = "APP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "APP_HEALTH_CHECK_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub health_check_enabled: bool,

    #[arg(long, env = "APP_HEALTH_CHECK_INTERVAL", default_value = "10s", value_parser = parse_duration)]
    pub health_check_interval: Duration,

    #[arg(long, env = "APP_HEALTH_CHECK_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub health_check_timeout: Duration,

    #[arg(long, env = "APP_HEALTH_CHECK_SUBJECT", default_value = "health")]
    pub health_check_subject: String,

    #[arg(long, env = "APP_HEALTH_CHECK_STATUS_TOPIC", default_value = "health.status")]
    pub health_check_status_topic: String,

    /// Deployment environment reported in health reports.
    #[arg(long = "env", env = "APP_ENV", default_value = "development")]
    pub environment: String,

    #[arg(long, env = "APP_STORE", value_enum, default_value_t = StoreKind::Memory)]
    pub store: StoreKind,

    /// Connection string, required when the store is `postgres`.
    #[arg(long, env = "APP_DATABASE_URL")]
    pub database_url: Option<String>,
}

impl AppConfig {
    /// Validates every component configuration derived from this one.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bus_config().validate()?;
        self.service_config().validate()?;
        self.health_config().validate()?;
        self.lifecycle_config().validate()?;
        if self.store == StoreKind::Postgres && self.database_url.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::invalid(
                "database_url",
                "required when the store is postgres",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            url: self.nats_url.clone(),
            ..BusConfig::default()
        }
    }

    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            name: self.service_name.clone(),
            in_channel_size: self.in_channel_size,
            worker_count: self.worker_count,
            request_timeout: self.request_timeout,
            query_event_duration: self.query_event_duration,
        }
    }

    #[must_use]
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            enabled: self.health_check_enabled,
            interval: self.health_check_interval,
            timeout: self.health_check_timeout,
            subject: self.health_check_subject.clone(),
            status_topic: self.health_check_status_topic.clone(),
            service_name: self.service_name.clone(),
            environment: self.environment.clone(),
            ..HealthConfig::default()
        }
    }

    #[must_use]
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(&self.log_format, &self.log_level)
    }
}

/// Parses durations such as `250ms`, `5s` or `2m`. A bare number is seconds.
///
/// # Errors
///
/// Returns a message naming the accepted forms.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let invalid = || format!("invalid duration {raw:?}: expected e.g. 250ms, 5s or 2m");

    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}
