use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::types::{Message, MessageSelector, MessagesSelector, Room, RoomSelector, RoomsSelector};

/// Durable CRUD over rooms.
///
/// Implementations must be safe to share across every request worker.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Persist a new room.
    ///
    /// Fails with `Invalid` (and persists nothing) when [`Room::validate`] fails.
    async fn create(&self, room: &Room) -> Result<(), ServiceError>;

    /// Load a single room. Fails with `NotFound` when absent.
    async fn read(&self, selector: &RoomSelector) -> Result<Room, ServiceError>;

    /// Load one keyset page of rooms ordered by id.
    ///
    /// Returns at most `selector.keyset.limit()` rooms whose id is strictly
    /// greater than `selector.keyset.last_key`, plus the id of the last room
    /// returned (nil when the page is empty).
    async fn read_all(&self, selector: &RoomsSelector) -> Result<(Vec<Room>, Uuid), ServiceError>;

    /// Delete a room and, with it, its messages. Fails with `NotFound` when absent.
    async fn delete(&self, selector: &RoomSelector) -> Result<(), ServiceError>;
}

/// Durable CRUD over messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message. Fails with `Invalid` when validation fails and
    /// with `NotFound` when the owning room does not exist.
    async fn create(&self, message: &Message) -> Result<(), ServiceError>;

    /// Load a single message. Fails with `NotFound` when absent.
    async fn read(&self, selector: &MessageSelector) -> Result<Message, ServiceError>;

    /// Load one keyset page of a room's messages ordered by id.
    /// Same contract as [`RoomStore::read_all`].
    async fn read_all(
        &self,
        selector: &MessagesSelector,
    ) -> Result<(Vec<Message>, Uuid), ServiceError>;

    /// Delete a single message. Fails with `NotFound` when absent.
    async fn delete(&self, selector: &MessageSelector) -> Result<(), ServiceError>;
}

/// The set of stores a server is wired with.
#[derive(Clone)]
pub struct Store {
    pub rooms: Arc<dyn RoomStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
