//! Room and message resources.
//!
//! Handlers are plain async functions taking the shared [`ChatDomain`] and the
//! request; [`register`] wires them into a [`ResourceRegistry`].

pub mod messages;
pub mod models;
pub mod rooms;

use std::future::Future;
use std::sync::Arc;

use saltychat_core::{ClockSource, Store};
use tracing::warn;

use crate::config::ConfigError;
use crate::service::registry::ResourceRegistry;
use crate::service::request::ResourceRequest;

/// Path parameter naming a room.
pub const ROOM_ID_PARAM: &str = "roomID";
/// Path parameter naming a message.
pub const MESSAGE_ID_PARAM: &str = "messageID";

/// State shared by every room and message handler.
pub struct ChatDomain {
    pub store: Store,
    pub clock: Arc<dyn ClockSource>,
}

impl std::fmt::Debug for ChatDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatDomain").field("store", &self.store).finish_non_exhaustive()
    }
}

/// Registers the room and message resources.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any pattern is already taken in `registry`.
pub fn register(
    registry: &mut ResourceRegistry,
    store: Store,
    clock: Arc<dyn ClockSource>,
) -> Result<(), ConfigError> {
    let domain = Arc::new(ChatDomain { store, clock });
    rooms::register(registry, &domain)?;
    messages::register(registry, &domain)?;
    Ok(())
}

/// Adapts `handler(domain, request)` to the registry's `handler(request)` shape.
fn with_domain<Fut>(
    domain: &Arc<ChatDomain>,
    handler: fn(Arc<ChatDomain>, ResourceRequest) -> Fut,
) -> impl Fn(ResourceRequest) -> Fut + Send + Sync + 'static
where
    Fut: Future + Send + 'static,
{
    let domain = Arc::clone(domain);
    move |req| handler(Arc::clone(&domain), req)
}

/// Publishes a query event for `rid`. Failures are logged, never returned:
/// the call that triggered the event has already succeeded.
async fn announce_query(req: &ResourceRequest, rid: &str) {
    if let Err(e) = req.events().query_event(rid).await {
        warn!(rid, error = %e.chain(), "failed to publish query event");
    }
}

async fn announce_delete(req: &ResourceRequest, rid: &str) {
    if let Err(e) = req.events().delete_event(rid).await {
        warn!(rid, error = %e.chain(), "failed to publish delete event");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use saltychat_core::{
        FixedClock, MessageStore, Room, RoomSelector, RoomStore, RoomsSelector, ServiceError,
        Store,
    };
    use uuid::Uuid;

    use crate::network::{LocalBus, ShutdownController};
    use crate::service::events::EventPublisher;
    use crate::service::operation::Dispatch;
    use crate::service::protocol::{DispatchResponse, RequestBody, RequestKind};
    use crate::service::registry::ResourceRegistry;
    use crate::service::router::ResourceRouter;
    use crate::service::operation::DispatchError;
    use crate::storage::MemoryStore;
    use crate::traits::Transport;
    use tower::ServiceExt;

    /// Room store over [`MemoryStore`] that can be armed to fail once.
    pub(crate) struct FlakyRooms {
        inner: Arc<MemoryStore>,
        fail_next: Mutex<Option<String>>,
    }

    impl FlakyRooms {
        pub(crate) fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                fail_next: Mutex::new(None),
            }
        }

        /// The next room operation fails with an `Internal` error.
        pub(crate) fn fail_next(&self, message: &str) {
            *self.fail_next.lock() = Some(message.to_string());
        }

        fn armed(&self, operation: &str) -> Result<(), ServiceError> {
            match self.fail_next.lock().take() {
                Some(message) => Err(ServiceError::internal(message).with_operation(operation)),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl RoomStore for FlakyRooms {
        async fn create(&self, room: &Room) -> Result<(), ServiceError> {
            self.armed("room.create")?;
            RoomStore::create(self.inner.as_ref(), room).await
        }

        async fn read(&self, selector: &RoomSelector) -> Result<Room, ServiceError> {
            self.armed("room.read")?;
            RoomStore::read(self.inner.as_ref(), selector).await
        }

        async fn read_all(
            &self,
            selector: &RoomsSelector,
        ) -> Result<(Vec<Room>, Uuid), ServiceError> {
            self.armed("rooms.read")?;
            RoomStore::read_all(self.inner.as_ref(), selector).await
        }

        async fn delete(&self, selector: &RoomSelector) -> Result<(), ServiceError> {
            self.armed("room.delete")?;
            RoomStore::delete(self.inner.as_ref(), selector).await
        }
    }

    /// Router over the chat resources of service `myapp`, backed by memory.
    pub(crate) struct Harness {
        pub router: ResourceRouter,
        pub bus: Arc<LocalBus>,
        pub store: Arc<MemoryStore>,
        pub rooms: Arc<FlakyRooms>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let bus = Arc::new(LocalBus::default());
            let store = Arc::new(MemoryStore::new());
            let rooms = Arc::new(FlakyRooms::new(Arc::clone(&store)));
            let backing = Store {
                rooms: Arc::clone(&rooms) as Arc<dyn RoomStore>,
                messages: Arc::clone(&store) as Arc<dyn MessageStore>,
            };
            let clock = FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

            let mut registry = ResourceRegistry::new("myapp");
            super::register(&mut registry, backing, Arc::new(clock)).unwrap();
            let registry = Arc::new(registry);
            let events = EventPublisher::new(
                Arc::clone(&bus) as Arc<dyn Transport>,
                Arc::clone(&registry),
                Duration::from_millis(200),
                Arc::new(ShutdownController::new()),
            );
            Self {
                router: ResourceRouter::new(registry, events),
                bus,
                store,
                rooms,
            }
        }

        pub(crate) async fn send(
            &self,
            kind: RequestKind,
            rid: &str,
            method: Option<&str>,
            body: RequestBody,
        ) -> Result<DispatchResponse, DispatchError> {
            self.router
                .clone()
                .oneshot(Dispatch {
                    kind,
                    rid: rid.to_string(),
                    method: method.map(str::to_string),
                    body,
                })
                .await
        }
    }
}
