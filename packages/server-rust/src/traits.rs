use async_trait::async_trait;

use crate::network::{BusMessage, Subscription, TransportError};

/// Message-bus connection the server is wired to.
///
/// Implementations provide ordered, at-least-once publish/subscribe on
/// named subjects. Request/reply is built on top: a request is a message
/// whose `reply` names the subject the response must be published to.
///
/// Subject patterns passed to [`Transport::subscribe`] use `*` to match one
/// token and a trailing `>` to match one or more remaining tokens.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Subscribe to every subject matching `pattern`.
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, TransportError>;

    /// Publish a message. Delivery to zero subscribers is not an error.
    async fn publish(&self, message: BusMessage) -> Result<(), TransportError>;

    /// Returns a fresh subject suitable for receiving replies.
    fn new_inbox(&self) -> String;

    /// Round-trips the connection. Used by the health supervisor.
    async fn ping(&self) -> Result<(), TransportError>;
}

/// A single dependency check run by the health supervisor.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Key under which the outcome is reported (e.g. `"nats"`).
    fn name(&self) -> &'static str;

    /// Returns `Ok` if the dependency is usable.
    async fn check(&self) -> anyhow::Result<()>;
}

/// A long-running unit supervised by the lifecycle [`Server`](crate::lifecycle::Server).
///
/// Units are started in registration order and shut down in reverse order.
#[async_trait]
pub trait ManagedService: Send + Sync + 'static {
    /// Name used in logs and lifecycle errors (e.g. `"resources"`, `"health"`).
    fn name(&self) -> &'static str;

    /// Runs until shutdown is requested or a fatal error occurs.
    ///
    /// Returning `Ok` before [`ManagedService::shutdown`] was called is
    /// treated as a clean early exit, not a failure.
    async fn run(&self) -> anyhow::Result<()>;

    /// Asks [`ManagedService::run`] to finish. Must be idempotent and must
    /// not wait for `run` to return.
    async fn shutdown(&self);
}
