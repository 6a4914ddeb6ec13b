//! Room and message storage.
//!
//! [`MemoryStore`] is the default backend and keeps everything in ordered
//! in-process maps. With the `postgres` feature, [`PgStore`] persists to
//! `PostgreSQL` through a `sqlx` connection pool. Both implement the
//! [`RoomStore`](saltychat_core::RoomStore) and
//! [`MessageStore`](saltychat_core::MessageStore) contracts and are handed to
//! the resource handlers as a [`Store`](saltychat_core::Store).

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use std::sync::Arc;

use saltychat_core::Store;

use crate::config::{AppConfig, StoreKind};

/// Builds the store selected by `config`.
///
/// # Errors
///
/// Fails when the `postgres` backend is selected but the binary was built
/// without the `postgres` feature, or when connecting or creating the schema
/// fails.
pub async fn open(config: &AppConfig) -> anyhow::Result<Store> {
    match config.store {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new()).as_store()),
        #[cfg(feature = "postgres")]
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("database url is required for the postgres store"))?;
            let store = Arc::new(PgStore::connect(url).await?);
            store.initialize().await?;
            Ok(store.as_store())
        }
        #[cfg(not(feature = "postgres"))]
        StoreKind::Postgres => {
            anyhow::bail!("the postgres store requires building with the `postgres` feature")
        }
    }
}
