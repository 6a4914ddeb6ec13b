//! JSON shapes of room and message resources and of their call parameters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use saltychat_core::clock::format_time;
use saltychat_core::{ClockSource, Message, Room, ServiceError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Room model as served on `<service>.rooms.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomModel {
    pub id: Uuid,
    pub created_at: String,
    pub last_activity: String,
    pub is_active: bool,
}

impl From<&Room> for RoomModel {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            created_at: format_time(&room.created_at),
            last_activity: format_time(&room.last_activity),
            is_active: room.is_active,
        }
    }
}

/// Parameters of the room `new` call.
///
/// Clients may send these fields but the server always sets them itself.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomParams {
    pub created_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

impl RoomParams {
    /// Builds a new active room with a fresh id, stamped with the clock's time.
    #[must_use]
    pub fn into_room(self, clock: &dyn ClockSource) -> Room {
        let now = clock.now();
        Room {
            id: Uuid::new_v4(),
            created_at: now,
            last_activity: now,
            is_active: true,
        }
    }
}

/// Message model as served on `<service>.rooms.<room>.messages.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageModel {
    pub id: Uuid,
    pub room_id: Uuid,
    /// Base64 of the ciphertext.
    pub encrypted_content: String,
    /// Base64 of the nonce.
    pub nonce: String,
    pub timestamp: String,
}

impl From<&Message> for MessageModel {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            room_id: msg.room_id,
            encrypted_content: STANDARD.encode(&msg.encrypted_content),
            nonce: STANDARD.encode(&msg.nonce),
            timestamp: format_time(&msg.timestamp),
        }
    }
}

/// Parameters of the message `new` call: base64 ciphertext and nonce.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageParams {
    pub encrypted_content: String,
    #[serde(default)]
    pub nonce: String,
}

impl MessageParams {
    /// Decodes the payload into a message for `room_id`.
    ///
    /// # Errors
    ///
    /// Returns an `Invalid` error when either field is not valid base64.
    pub fn into_message(
        self,
        room_id: Uuid,
        clock: &dyn ClockSource,
    ) -> Result<Message, ServiceError> {
        let decode = |field: &str, raw: &str| {
            STANDARD.decode(raw).map_err(|e| {
                ServiceError::invalid(format!("Invalid '{field}' parameter")).with_source(e)
            })
        };
        Ok(Message {
            id: Uuid::new_v4(),
            room_id,
            encrypted_content: decode("encryptedContent", &self.encrypted_content)?,
            nonce: decode("nonce", &self.nonce)?,
            timestamp: clock.now(),
        })
    }
}
