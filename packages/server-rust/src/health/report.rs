use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use saltychat_core::clock::format_time;
use serde::Serialize;

use super::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Outcome of one check in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CheckResult {
    #[must_use]
    pub fn passed(elapsed: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            error: None,
            duration_ms: millis(elapsed),
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            error: Some(error.into()),
            duration_ms: millis(elapsed),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Aggregated result of a check round, as published on the status topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub service: String,
    pub environment: String,
    pub version: String,
    pub timestamp: String,
    pub checks: BTreeMap<String, CheckResult>,
}

impl HealthReport {
    /// Report held before the first round completes: unhealthy, no checks.
    #[must_use]
    pub fn pending(config: &HealthConfig, now: DateTime<Utc>) -> Self {
        Self::from_checks(config, now, BTreeMap::new(), HealthStatus::Unhealthy)
    }

    /// Healthy only if every check passed.
    #[must_use]
    pub fn collect(
        config: &HealthConfig,
        now: DateTime<Utc>,
        checks: BTreeMap<String, CheckResult>,
    ) -> Self {
        let status = if checks.values().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self::from_checks(config, now, checks, status)
    }

    fn from_checks(
        config: &HealthConfig,
        now: DateTime<Utc>,
        checks: BTreeMap<String, CheckResult>,
        status: HealthStatus,
    ) -> Self {
        Self {
            status,
            service: config.service_name.clone(),
            environment: config.environment.clone(),
            version: config.version.clone(),
            timestamp: format_time(&now),
            checks,
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// JSON payload for the bus.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        // Plain strings, maps and integers: serialization cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}
