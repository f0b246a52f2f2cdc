//! Conversations, messages and contacts.
//!
//! Owns the canonical records, their persistence contracts and the SQLite
//! implementation, the [`ConversationResolver`] that keeps one active
//! conversation per identity tuple, and the [`MessageNormalizer`] that
//! validates and persists message events.

pub mod model;
pub mod normalizer;
pub mod resolver;
pub mod sqlite;
pub mod store;

use {
    parley_common::{Error, Result},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
};

pub use {
    model::{
        Attachment, AttachmentKind, Contact, Conversation, ConversationStatus, DeliveryStatus,
        Direction, IdentityTuple, LastMessage, Message, Priority, SenderType,
    },
    normalizer::{CreateMessage, MessageNormalizer},
    resolver::{BestEffort, ConversationResolver},
    sqlite::SqliteStore,
    store::{ContactStore, ConversationStore, MessageStore},
};

/// Open a SQLite pool. In-memory databases need `max_connections = 1`.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(url)
        .await
        .map_err(|e| Error::external(format!("connecting to {url}"), e))
}

/// Run database migrations for the conversations crate.
///
/// Creates the `contacts`, `conversations` and `messages` tables.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::external("running conversation migrations", e))
}
