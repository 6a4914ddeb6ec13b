//! `PostgreSQL` store over a `sqlx` connection pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use saltychat_core::{
    Message, MessageSelector, MessageStore, MessagesSelector, Room, RoomSelector, RoomStore,
    RoomsSelector, ServiceError, Store,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS rooms (
        id UUID PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL,
        last_activity TIMESTAMPTZ NOT NULL,
        is_active BOOLEAN NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS messages (
        id UUID PRIMARY KEY,
        room_id UUID NOT NULL REFERENCES rooms (id) ON DELETE CASCADE,
        encrypted_content BYTEA NOT NULL,
        nonce BYTEA NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_room_id_id ON messages (room_id, id)",
];

type RoomRow = (Uuid, DateTime<Utc>, DateTime<Utc>, bool);
type MessageRow = (Uuid, Uuid, Vec<u8>, Vec<u8>, DateTime<Utc>);

fn room_from_row((id, created_at, last_activity, is_active): RoomRow) -> Room {
    Room {
        id,
        created_at,
        last_activity,
        is_active,
    }
}

fn message_from_row((id, room_id, encrypted_content, nonce, timestamp): MessageRow) -> Message {
    Message {
        id,
        room_id,
        encrypted_content,
        nonce,
        timestamp,
    }
}

/// Maps a `sqlx` error onto the store error taxonomy.
///
/// Missing rows become `NotFound`, constraint violations `Invalid`, and
/// everything else `Internal` with the driver error attached.
fn map_sql_error(operation: &str, err: sqlx::Error) -> ServiceError {
    let mapped = match &err {
        sqlx::Error::RowNotFound => ServiceError::not_found("Not found"),
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_check_violation() || db.is_foreign_key_violation() =>
        {
            ServiceError::invalid("Constraint violation")
        }
        _ => ServiceError::internal("Database error"),
    };
    mapped.with_operation(operation).with_source(err)
}

/// Rooms and messages persisted in `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool to `url`.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be reached.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Creates the tables and indexes if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Fails when any schema statement is rejected.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("postgres schema ready");
        Ok(())
    }

    #[must_use]
    pub fn as_store(self: &Arc<Self>) -> Store {
        Store {
            rooms: Arc::clone(self) as Arc<dyn RoomStore>,
            messages: Arc::clone(self) as Arc<dyn MessageStore>,
        }
    }

    async fn room_exists(&self, room_id: Uuid, operation: &str) -> Result<(), ServiceError> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sql_error(operation, e))?;
        found
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("Room not found").with_operation(operation))
    }
}

fn page_limit(limit: u32) -> i64 {
    i64::from(limit)
}

#[async_trait]
impl RoomStore for PgStore {
    async fn create(&self, room: &Room) -> Result<(), ServiceError> {
        room.validate()?;
        sqlx::query(
            "INSERT INTO rooms (id, created_at, last_activity, is_active) VALUES ($1, $2, $3, $4)",
        )
        .bind(room.id)
        .bind(room.created_at)
        .bind(room.last_activity)
        .bind(room.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sql_error("room.create", e))?;
        Ok(())
    }

    async fn read(&self, selector: &RoomSelector) -> Result<Room, ServiceError> {
        sqlx::query_as::<_, RoomRow>(
            "SELECT id, created_at, last_activity, is_active FROM rooms WHERE id = $1",
        )
        .bind(selector.room_id)
        .fetch_one(&self.pool)
        .await
        .map(room_from_row)
        .map_err(|e| map_sql_error("room.read", e))
    }

    async fn read_all(&self, selector: &RoomsSelector) -> Result<(Vec<Room>, Uuid), ServiceError> {
        let rooms: Vec<Room> = sqlx::query_as::<_, RoomRow>(
            "SELECT id, created_at, last_activity, is_active FROM rooms \
             WHERE id > $1 ORDER BY id LIMIT $2",
        )
        .bind(selector.keyset.last_key)
        .bind(page_limit(selector.keyset.limit()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sql_error("room.read_all", e))?
        .into_iter()
        .map(room_from_row)
        .collect();
        let last = rooms.last().map_or(Uuid::nil(), |r| r.id);
        Ok((rooms, last))
    }

    async fn delete(&self, selector: &RoomSelector) -> Result<(), ServiceError> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(selector.room_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sql_error("room.delete", e))?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::not_found("Room not found").with_operation("room.delete"));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn create(&self, message: &Message) -> Result<(), ServiceError> {
        message.validate()?;
        self.room_exists(message.room_id, "message.create").await?;
        sqlx::query(
            "INSERT INTO messages (id, room_id, encrypted_content, nonce, timestamp) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.id)
        .bind(message.room_id)
        .bind(&message.encrypted_content)
        .bind(&message.nonce)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sql_error("message.create", e))?;
        Ok(())
    }

    async fn read(&self, selector: &MessageSelector) -> Result<Message, ServiceError> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT id, room_id, encrypted_content, nonce, timestamp FROM messages \
             WHERE id = $1 AND room_id = $2",
        )
        .bind(selector.message_id)
        .bind(selector.room_id)
        .fetch_one(&self.pool)
        .await
        .map(message_from_row)
        .map_err(|e| map_sql_error("message.read", e))
    }

    async fn read_all(
        &self,
        selector: &MessagesSelector,
    ) -> Result<(Vec<Message>, Uuid), ServiceError> {
        self.room_exists(selector.room_id, "message.read_all").await?;
        let messages: Vec<Message> = sqlx::query_as::<_, MessageRow>(
            "SELECT id, room_id, encrypted_content, nonce, timestamp FROM messages \
             WHERE room_id = $1 AND id > $2 ORDER BY id LIMIT $3",
        )
        .bind(selector.room_id)
        .bind(selector.keyset.last_key)
        .bind(page_limit(selector.keyset.limit()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sql_error("message.read_all", e))?
        .into_iter()
        .map(message_from_row)
        .collect();
        let last = messages.last().map_or(Uuid::nil(), |m| m.id);
        Ok((messages, last))
    }

    async fn delete(&self, selector: &MessageSelector) -> Result<(), ServiceError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1 AND room_id = $2")
            .bind(selector.message_id)
            .bind(selector.room_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sql_error("message.delete", e))?;
        if result.rows_affected() == 0 {
            return Err(
                ServiceError::not_found("Message not found").with_operation("message.delete")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use saltychat_core::ErrorCode;

    use super::*;

    #[test]
    fn missing_row_maps_to_not_found() {
        let err = map_sql_error("room.read", sqlx::Error::RowNotFound);
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.operation.as_deref(), Some("room.read"));
    }

    #[test]
    fn driver_failures_map_to_internal() {
        let err = map_sql_error("room.read_all", sqlx::Error::PoolTimedOut);
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
