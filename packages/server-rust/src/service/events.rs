//! Resource events: query events with their listening window, and delete events.
//!
//! A query event tells subscribers that a collection may have changed. The
//! service then listens on a fresh query subject for the configured window
//! and answers every query request sent there with the collection recomputed
//! for that request's query. When the window closes the callback runs one
//! last time with no request.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use saltychat_core::ServiceError;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::operation::DispatchError;
use super::pattern::PathParams;
use super::protocol::{encode_error, encode_query_event, log_error, DispatchResponse, RequestBody};
use super::registry::{BoxFuture, ResourceRegistry};
use super::request::ResourceRequest;
use crate::network::{BusMessage, ShutdownController};
use crate::traits::Transport;

/// Answers query requests during a query event window.
///
/// Invoked with `Some(request)` for each query request and once with `None`
/// when the window closes; returning `None` sends no reply.
pub type QueryCallback =
    Arc<dyn Fn(Option<ResourceRequest>) -> BoxFuture<QueryResult> + Send + Sync>;

/// Outcome of one query callback invocation; `None` sends no reply.
pub type QueryResult = Option<Result<DispatchResponse, ServiceError>>;

struct Inner {
    transport: Arc<dyn Transport>,
    registry: Arc<ResourceRegistry>,
    query_duration: Duration,
    shutdown: Arc<ShutdownController>,
    listeners: Mutex<JoinSet<()>>,
}

/// Publishes events for resources of one service. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    inner: Arc<Inner>,
}

impl EventPublisher {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ResourceRegistry>,
        query_duration: Duration,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                query_duration,
                shutdown,
                listeners: Mutex::new(JoinSet::new()),
            }),
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        self.inner.registry.service_name()
    }

    /// Publishes a query event for `rid`, answering query requests with the
    /// get handler registered for it.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error when `rid` has no get handler or the event
    /// cannot be published.
    pub async fn query_event(&self, rid: &str) -> Result<(), ServiceError> {
        let get = self
            .inner
            .registry
            .lookup(rid)
            .and_then(|(handlers, _)| handlers.get.clone())
            .ok_or_else(|| ServiceError::internal(format!("no get handler for {rid}")))?;

        let callback: QueryCallback = Arc::new(move |req| -> BoxFuture<QueryResult> {
            let get = get.clone();
            Box::pin(async move {
                let req = req?;
                Some(get.invoke(req).await)
            })
        });
        self.query_event_with(rid, callback).await
    }

    /// Publishes a query event for `rid` with a custom callback.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error when subscribing to the query subject or
    /// publishing the event fails.
    pub async fn query_event_with(
        &self,
        rid: &str,
        callback: QueryCallback,
    ) -> Result<(), ServiceError> {
        let transport = &self.inner.transport;
        let subject = transport.new_inbox();
        let mut sub = transport.subscribe(&subject).await.map_err(|e| {
            ServiceError::internal("failed to subscribe to query subject").with_source(e)
        })?;
        transport
            .publish(BusMessage::new(
                format!("event.{rid}.query"),
                encode_query_event(&subject),
            ))
            .await
            .map_err(|e| ServiceError::internal("failed to publish query event").with_source(e))?;

        metrics::counter!("saltychat_query_events_total").increment(1);
        debug!(rid, subject = %subject, "query event published");

        let publisher = self.clone();
        let rid = rid.to_string();
        let params = self
            .inner
            .registry
            .lookup(&rid)
            .map(|(_, params)| params)
            .unwrap_or_default();
        let window = self.inner.query_duration;
        let stopped = self.inner.shutdown.stopped();

        let mut listeners = self.inner.listeners.lock();
        while listeners.try_join_next().is_some() {}
        listeners.spawn(async move {
            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline, stopped);
            loop {
                tokio::select! {
                    msg = sub.next() => match msg {
                        Some(msg) => publisher.answer_query(&rid, &params, msg, &callback).await,
                        None => break,
                    },
                    () = &mut deadline => break,
                    () = &mut stopped => break,
                }
            }
            drop(sub);
            // Window closed: the callback sees no request and replies nothing.
            let _ = callback(None).await;
            debug!(rid = %rid, "query event window closed");
        });
        Ok(())
    }

    /// Publishes a delete event for `rid`.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error when the event cannot be published.
    pub async fn delete_event(&self, rid: &str) -> Result<(), ServiceError> {
        self.inner
            .transport
            .publish(BusMessage::new(format!("event.{rid}.delete"), "{}"))
            .await
            .map_err(|e| ServiceError::internal("failed to publish delete event").with_source(e))
    }

    /// Number of query windows still open.
    #[must_use]
    pub fn open_windows(&self) -> usize {
        let mut listeners = self.inner.listeners.lock();
        while listeners.try_join_next().is_some() {}
        listeners.len()
    }

    /// Waits for every open query window to finish.
    ///
    /// Windows close early once shutdown has been triggered.
    pub async fn close(&self) {
        let mut listeners = std::mem::take(&mut *self.inner.listeners.lock());
        while listeners.join_next().await.is_some() {}
    }

    async fn answer_query(
        &self,
        rid: &str,
        params: &PathParams,
        msg: BusMessage,
        callback: &QueryCallback,
    ) {
        let Some(reply) = msg.reply else {
            debug!(rid, "query request without reply subject");
            return;
        };

        let payload = match RequestBody::decode(&msg.payload) {
            Ok(body) => {
                let query = body.query.clone();
                let req = ResourceRequest::new(rid, params.clone(), None, body, self.clone());
                match callback(Some(req)).await {
                    Some(Ok(resp)) => resp.encode(query.as_deref()),
                    Some(Err(e)) => encode_error(&log_error(&DispatchError::Service(e), rid)),
                    None => return,
                }
            }
            Err(e) => encode_error(&log_error(&e, rid)),
        };

        if let Err(e) = self.inner.transport.publish(BusMessage::new(reply, payload)).await {
            warn!(rid, error = %e, "failed to answer query request");
        }
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("service_name", &self.service_name())
            .field("query_duration", &self.inner.query_duration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;

    use super::*;
    use crate::network::{request, LocalBus};
    use crate::service::protocol::Ref;
    use crate::service::registry::ResourceRegistry;

    pub(crate) fn publisher(name: &str) -> EventPublisher {
        EventPublisher::new(
            Arc::new(LocalBus::default()),
            Arc::new(ResourceRegistry::new(name)),
            Duration::from_millis(100),
            Arc::new(ShutdownController::new()),
        )
    }

    fn setup(
        registry: ResourceRegistry,
        window: Duration,
    ) -> (EventPublisher, Arc<LocalBus>, Arc<ShutdownController>) {
        let bus = Arc::new(LocalBus::default());
        let shutdown = Arc::new(ShutdownController::new());
        let publisher = EventPublisher::new(
            Arc::clone(&bus) as Arc<dyn Transport>,
            Arc::new(registry),
            window,
            Arc::clone(&shutdown),
        );
        (publisher, bus, shutdown)
    }

    async fn event_subject(sub: &mut crate::network::Subscription) -> String {
        let event = sub.next().await.unwrap();
        let body: Value = serde_json::from_slice(&event.payload).unwrap();
        body["subject"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn query_event_answers_with_registered_collection() {
        let mut registry = ResourceRegistry::new("myapp");
        registry
            .register_collection_query("rooms", |req: ResourceRequest| async move {
                let size = req.parse_query().get("size").unwrap_or("0").to_string();
                Ok(vec![Ref::new(format!("myapp.rooms.{size}"))])
            })
            .unwrap();
        let (publisher, bus, _shutdown) = setup(registry, Duration::from_secs(2));

        let mut events = bus.subscribe("event.myapp.rooms.query").await.unwrap();
        publisher.query_event("myapp.rooms").await.unwrap();
        let subject = event_subject(&mut events).await;

        let reply = request(
            bus.as_ref(),
            &subject,
            r#"{"query":"size=3"}"#,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let body: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(body["result"]["collection"][0]["rid"], "myapp.rooms.3");
        assert_eq!(body["result"]["query"], "size=3");
    }

    #[tokio::test]
    async fn window_close_invokes_callback_once_without_request() {
        let (publisher, bus, _shutdown) =
            setup(ResourceRegistry::new("myapp"), Duration::from_millis(30));
        let closed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closed);
        let callback: QueryCallback = Arc::new(move |req| -> BoxFuture<QueryResult> {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                if req.is_none() {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                None
            })
        });

        let mut events = bus.subscribe("event.myapp.rooms.query").await.unwrap();
        publisher.query_event_with("myapp.rooms", callback).await.unwrap();
        let _ = event_subject(&mut events).await;

        publisher.close().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.open_windows(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_windows_early() {
        let (publisher, _bus, shutdown) =
            setup(ResourceRegistry::new("myapp"), Duration::from_secs(60));
        let callback: QueryCallback =
            Arc::new(|_req| -> BoxFuture<QueryResult> { Box::pin(async { None }) });
        publisher.query_event_with("myapp.rooms", callback).await.unwrap();
        assert_eq!(publisher.open_windows(), 1);

        shutdown.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), publisher.close())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn query_event_without_get_handler_fails() {
        let (publisher, _bus, _shutdown) =
            setup(ResourceRegistry::new("myapp"), Duration::from_millis(10));
        let err = publisher.query_event("myapp.rooms").await.unwrap_err();
        assert_eq!(err.code, saltychat_core::ErrorCode::Internal);
    }

    #[tokio::test]
    async fn delete_event_is_published() {
        let (publisher, bus, _shutdown) =
            setup(ResourceRegistry::new("myapp"), Duration::from_millis(10));
        let mut events = bus.subscribe("event.myapp.rooms.>").await.unwrap();
        publisher.delete_event("myapp.rooms.abc").await.unwrap();
        let event = events.next().await.unwrap();
        assert_eq!(event.subject, "event.myapp.rooms.abc.delete");
    }
}
