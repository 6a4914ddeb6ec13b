//! Periodic dependency checks and status reporting.
//!
//! The [`HealthSupervisor`] runs every registered [`HealthCheck`] on a fixed
//! interval, each bounded by its own timeout, publishes the aggregated
//! [`HealthReport`] on the status topic and answers health requests with the
//! latest report.

pub mod config;
pub mod report;
pub mod supervisor;

pub use config::HealthConfig;
pub use report::{CheckResult, HealthReport, HealthStatus};
pub use supervisor::{HealthSupervisor, TransportCheck};
