//! In-memory [`RoomStore`] / [`MessageStore`] backed by ordered maps.
//!
//! Rows are keyed by id in a [`BTreeMap`], so a keyset page is a range scan
//! starting just after the last key.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use saltychat_core::{
    KeysetSelector, Message, MessageSelector, MessageStore, MessagesSelector, Room, RoomSelector,
    RoomStore, RoomsSelector, ServiceError, Store,
};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    rooms: BTreeMap<Uuid, Room>,
    messages: BTreeMap<Uuid, Message>,
}

/// Process-local store. Data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps this store as both the room and the message store.
    #[must_use]
    pub fn as_store(self: &Arc<Self>) -> Store {
        Store {
            rooms: Arc::clone(self) as Arc<dyn RoomStore>,
            messages: Arc::clone(self) as Arc<dyn MessageStore>,
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryStore")
            .field("rooms", &tables.rooms.len())
            .field("messages", &tables.messages.len())
            .finish()
    }
}

/// Collects one keyset page from `rows` and the id of its last row
/// (nil when the page is empty).
fn keyset_page<'a, T: Clone + 'a>(
    rows: impl Iterator<Item = (&'a Uuid, &'a T)>,
    keyset: &KeysetSelector<Uuid>,
) -> (Vec<T>, Uuid) {
    let limit = keyset.limit() as usize;
    let mut last = Uuid::nil();
    let page = rows
        .take(limit)
        .map(|(id, row)| {
            last = *id;
            row.clone()
        })
        .collect();
    (page, last)
}

fn after(last_key: Uuid) -> (Bound<Uuid>, Bound<Uuid>) {
    (Bound::Excluded(last_key), Bound::Unbounded)
}

fn room_not_found(operation: &str) -> ServiceError {
    ServiceError::not_found("Room not found").with_operation(operation)
}

fn message_not_found(operation: &str) -> ServiceError {
    ServiceError::not_found("Message not found").with_operation(operation)
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create(&self, room: &Room) -> Result<(), ServiceError> {
        room.validate()?;
        let mut tables = self.tables.write();
        if tables.rooms.contains_key(&room.id) {
            return Err(ServiceError::invalid("Room already exists").with_operation("room.create"));
        }
        tables.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn read(&self, selector: &RoomSelector) -> Result<Room, ServiceError> {
        self.tables
            .read()
            .rooms
            .get(&selector.room_id)
            .cloned()
            .ok_or_else(|| room_not_found("room.read"))
    }

    async fn read_all(&self, selector: &RoomsSelector) -> Result<(Vec<Room>, Uuid), ServiceError> {
        let tables = self.tables.read();
        let rows = tables.rooms.range(after(selector.keyset.last_key));
        Ok(keyset_page(rows, &selector.keyset))
    }

    async fn delete(&self, selector: &RoomSelector) -> Result<(), ServiceError> {
        let mut tables = self.tables.write();
        if tables.rooms.remove(&selector.room_id).is_none() {
            return Err(room_not_found("room.delete"));
        }
        tables.messages.retain(|_, m| m.room_id != selector.room_id);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create(&self, message: &Message) -> Result<(), ServiceError> {
        message.validate()?;
        let mut tables = self.tables.write();
        if !tables.rooms.contains_key(&message.room_id) {
            return Err(room_not_found("message.create"));
        }
        if tables.messages.contains_key(&message.id) {
            return Err(
                ServiceError::invalid("Message already exists").with_operation("message.create")
            );
        }
        tables.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn read(&self, selector: &MessageSelector) -> Result<Message, ServiceError> {
        self.tables
            .read()
            .messages
            .get(&selector.message_id)
            .filter(|m| m.room_id == selector.room_id)
            .cloned()
            .ok_or_else(|| message_not_found("message.read"))
    }

    async fn read_all(
        &self,
        selector: &MessagesSelector,
    ) -> Result<(Vec<Message>, Uuid), ServiceError> {
        let tables = self.tables.read();
        if !tables.rooms.contains_key(&selector.room_id) {
            return Err(room_not_found("message.read_all"));
        }
        let rows = tables
            .messages
            .range(after(selector.keyset.last_key))
            .filter(|(_, m)| m.room_id == selector.room_id);
        Ok(keyset_page(rows, &selector.keyset))
    }

    async fn delete(&self, selector: &MessageSelector) -> Result<(), ServiceError> {
        let mut tables = self.tables.write();
        match tables.messages.get(&selector.message_id) {
            Some(m) if m.room_id == selector.room_id => {
                tables.messages.remove(&selector.message_id);
                Ok(())
            }
            _ => Err(message_not_found("message.delete")),
        }
    }
}
