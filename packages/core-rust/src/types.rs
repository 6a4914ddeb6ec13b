use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::pagination::KeysetSelector;

/// A chat room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
}

impl Room {
    /// Checks the invariants a room must hold before it is persisted.
    ///
    /// # Errors
    ///
    /// Returns an `Invalid` error when the id is nil.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.id.is_nil() {
            return Err(ServiceError::invalid("Room ID is required").with_operation("room.validate"));
        }
        Ok(())
    }
}

/// An end-to-end encrypted message posted to a room.
///
/// `encrypted_content` and `nonce` are opaque to the server: they are stored
/// and returned byte for byte and never decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    /// Owning room.
    pub room_id: Uuid,
    pub encrypted_content: Vec<u8>,
    pub nonce: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Checks the invariants a message must hold before it is persisted.
    ///
    /// # Errors
    ///
    /// Returns an `Invalid` error when either id is nil or the ciphertext is empty.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let fail = |msg: &str| {
            Err(ServiceError::invalid(msg).with_operation("message.validate"))
        };
        if self.id.is_nil() {
            return fail("Message ID is required");
        }
        if self.room_id.is_nil() {
            return fail("Message room ID is required");
        }
        if self.encrypted_content.is_empty() {
            return fail("Message content is required");
        }
        Ok(())
    }
}

/// Looks up a single room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSelector {
    pub room_id: Uuid,
}

/// A page of rooms, ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoomsSelector {
    pub keyset: KeysetSelector<Uuid>,
}

/// Looks up a single message inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSelector {
    pub room_id: Uuid,
    pub message_id: Uuid,
}

/// A page of one room's messages, ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagesSelector {
    pub keyset: KeysetSelector<Uuid>,
    pub room_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn room(id: Uuid) -> Room {
        let now = Utc::now();
        Room {
            id,
            created_at: now,
            last_activity: now,
            is_active: true,
        }
    }

    fn message(id: Uuid, room_id: Uuid, content: &[u8]) -> Message {
        Message {
            id,
            room_id,
            encrypted_content: content.to_vec(),
            nonce: vec![7; 12],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn room_with_id_is_valid() {
        assert!(room(Uuid::new_v4()).validate().is_ok());
    }

    #[test]
    fn room_without_id_is_invalid() {
        let err = room(Uuid::nil()).validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::Invalid);
    }

    #[test]
    fn message_validation() {
        let id = Uuid::new_v4();
        let room_id = Uuid::new_v4();
        assert!(message(id, room_id, b"ciphertext").validate().is_ok());
        assert!(message(Uuid::nil(), room_id, b"x").validate().is_err());
        assert!(message(id, Uuid::nil(), b"x").validate().is_err());
        assert_eq!(
            message(id, room_id, b"").validate().unwrap_err().code,
            ErrorCode::Invalid
        );
    }

    #[test]
    fn message_bytes_are_variable_length() {
        let m = message(Uuid::new_v4(), Uuid::new_v4(), &[1, 2, 3, 4, 5]);
        assert_eq!(m.encrypted_content.len(), 5);
        assert_eq!(m.nonce.len(), 12);
    }
}
