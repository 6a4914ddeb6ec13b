//! The resource service: bus readers, a bounded request queue and a worker pool.
//!
//! One reader per request kind subscribes to `<kind>.<service>.>` and feeds a
//! single bounded queue. `worker_count` workers drain the queue, run each
//! request through the middleware pipeline, and publish the response on the
//! request's reply subject. A full queue makes readers wait, which leaves
//! backpressure to the bus.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use super::config::ServiceConfig;
use super::events::EventPublisher;
use super::middleware::{build_request_pipeline, RequestPipeline};
use super::operation::{Dispatch, DispatchError};
use super::protocol::{encode_error, log_error, RequestKind};
use super::registry::ResourceRegistry;
use super::router::ResourceRouter;
use crate::config::ConfigError;
use crate::network::{BusMessage, LifecycleState, ShutdownController, Subscription, TransportError};
use crate::traits::{ManagedService, Transport};

/// Errors that end [`ResourceService::serve`].
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("service already started")]
    AlreadyStarted,
    #[error("failed to subscribe to {subject}")]
    Subscribe {
        subject: String,
        #[source]
        source: TransportError,
    },
    #[error("subscription {subject} closed unexpectedly")]
    SubscriptionClosed { subject: String },
}

/// Serves the resources of one [`ResourceRegistry`] over a [`Transport`].
pub struct ResourceService {
    config: ServiceConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<ResourceRegistry>,
    events: EventPublisher,
    controller: Arc<ShutdownController>,
}

impl ResourceService {
    /// Validates the configuration and freezes the handler table.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an invalid configuration or when the
    /// registry was built for a different service name.
    pub fn new(
        config: ServiceConfig,
        registry: ResourceRegistry,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if registry.service_name() != config.name {
            return Err(ConfigError::invalid(
                "service.name",
                format!(
                    "registry was built for {:?}, config names {:?}",
                    registry.service_name(),
                    config.name
                ),
            ));
        }

        let registry = Arc::new(registry);
        let controller = Arc::new(ShutdownController::new());
        let events = EventPublisher::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            config.query_event_duration,
            Arc::clone(&controller),
        );
        Ok(Self {
            config,
            transport,
            registry,
            events,
            controller,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    /// Requests currently being handled by a worker.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.controller.in_flight_count()
    }

    /// Serves requests until [`ResourceService::stop`] is called or a
    /// subscription ends unexpectedly.
    ///
    /// On stop, readers stop accepting, every queued request is still
    /// handled, and open query windows are closed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] when called twice, when subscribing fails, or
    /// when the transport drops a subscription while serving.
    pub async fn serve(&self) -> Result<(), ServeError> {
        if !self.controller.try_start() {
            if self.controller.is_shutting_down() {
                // Stopped before it ever started.
                self.controller.set_stopped();
                return Ok(());
            }
            return Err(ServeError::AlreadyStarted);
        }

        let mut subscriptions = Vec::with_capacity(RequestKind::ALL.len());
        for kind in RequestKind::ALL {
            let subject = format!("{}.{}.>", kind.as_str(), self.config.name);
            match self.transport.subscribe(&subject).await {
                Ok(sub) => subscriptions.push(sub),
                Err(source) => {
                    self.controller.set_failed();
                    return Err(ServeError::Subscribe { subject, source });
                }
            }
        }

        let (tx, rx) = mpsc::channel(self.config.in_channel_size);
        let rx = Arc::new(Mutex::new(rx));

        let router = ResourceRouter::new(Arc::clone(&self.registry), self.events.clone());
        let pipeline = build_request_pipeline(router, &self.config);

        let mut workers = JoinSet::new();
        for _ in 0..self.config.worker_count {
            workers.spawn(worker_loop(
                Arc::clone(&rx),
                pipeline.clone(),
                Arc::clone(&self.transport),
                Arc::clone(&self.controller),
            ));
        }

        let mut readers = JoinSet::new();
        for sub in subscriptions {
            readers.spawn(reader_loop(sub, tx.clone(), Arc::clone(&self.controller)));
        }
        drop(tx);

        // A stop that landed while subscribing wins: readers see it at once
        // and the state stays `ShuttingDown`.
        self.controller.set_running();
        info!(
            service = %self.config.name,
            workers = self.config.worker_count,
            queue = self.config.in_channel_size,
            "resource service running"
        );

        let mut failure = None;
        while let Some(joined) = readers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if failure.is_none() {
                        error!(error = %e, "resource service reader failed");
                        failure = Some(e);
                        // Stop the other readers and close query windows.
                        self.controller.trigger_shutdown();
                    }
                }
                Err(e) => warn!(error = %e, "reader task ended abnormally"),
            }
        }

        // Readers are gone, so the queue closes once drained.
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        self.events.close().await;

        match failure {
            Some(e) => {
                self.controller.set_failed();
                Err(e)
            }
            None => {
                self.controller.set_stopped();
                info!(service = %self.config.name, "resource service stopped");
                Ok(())
            }
        }
    }

    /// Stops accepting requests. [`ResourceService::serve`] returns once the
    /// queue has drained.
    pub fn stop(&self) {
        self.controller.trigger_shutdown();
    }
}

impl std::fmt::Debug for ResourceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceService")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ManagedService for ResourceService {
    fn name(&self) -> &'static str {
        "resources"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.serve().await?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Readers and workers
// ---------------------------------------------------------------------------

async fn reader_loop(
    mut sub: Subscription,
    tx: mpsc::Sender<BusMessage>,
    controller: Arc<ShutdownController>,
) -> Result<(), ServeError> {
    let stopped = controller.stopped();
    tokio::pin!(stopped);
    loop {
        tokio::select! {
            msg = sub.next() => match msg {
                Some(msg) => {
                    if tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
                None if controller.is_shutting_down() => return Ok(()),
                None => {
                    return Err(ServeError::SubscriptionClosed {
                        subject: sub.pattern().to_string(),
                    });
                }
            },
            () = &mut stopped => return Ok(()),
        }
    }
}

async fn worker_loop(
    queue: Arc<Mutex<mpsc::Receiver<BusMessage>>>,
    pipeline: RequestPipeline,
    transport: Arc<dyn Transport>,
    controller: Arc<ShutdownController>,
) {
    loop {
        let msg = queue.lock().await.recv().await;
        let Some(msg) = msg else {
            break;
        };
        let _guard = controller.in_flight_guard();
        handle_message(transport.as_ref(), pipeline.clone(), msg).await;
    }
}

async fn handle_message(transport: &dyn Transport, pipeline: RequestPipeline, msg: BusMessage) {
    let BusMessage {
        subject,
        reply,
        payload,
    } = msg;

    let (rid, response) = match Dispatch::decode(&subject, &payload) {
        Ok(dispatch) => {
            let rid = dispatch.rid.clone();
            let query = dispatch.query().map(str::to_string);
            let outcome = AssertUnwindSafe(pipeline.oneshot(dispatch))
                .catch_unwind()
                .await;
            let response = match outcome {
                Ok(Ok(resp)) => resp.encode(query.as_deref()),
                Ok(Err(e)) => encode_error(&log_error(&e, &rid)),
                Err(_panic) => {
                    let e = DispatchError::Service(saltychat_core::ServiceError::internal(
                        "handler panicked",
                    ));
                    encode_error(&log_error(&e, &rid))
                }
            };
            (rid, response)
        }
        Err(e) => {
            let response = encode_error(&log_error(&e, &subject));
            (subject, response)
        }
    };

    let Some(reply) = reply else {
        debug!(rid = %rid, "request without reply subject, response dropped");
        return;
    };
    if let Err(e) = transport.publish(BusMessage::new(reply, response)).await {
        warn!(rid = %rid, error = %e, "failed to publish response");
    }
}
