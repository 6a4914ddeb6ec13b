//! `SaltyChat` Server: room and message resources served over a message bus,
//! with health and lifecycle supervision.

pub mod app;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod service;
pub mod storage;
pub mod traits;

pub use app::App;
pub use config::{AppConfig, ConfigError};
pub use lifecycle::{LifecycleConfig, LifecycleError, Server};
pub use traits::{HealthCheck, ManagedService, Transport};
