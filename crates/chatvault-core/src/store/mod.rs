//! Persistence protocol shared by the SQLite and PostgreSQL backends.
//!
//! Writes run inside a per-conversation transaction that the first write opens
//! lazily and [`ChatStore::commit`] or [`ChatStore::rollback`] closes. Reads
//! (`count_*`, `fetch_*`) go through the pool and see committed state only.

mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use std::future::Future;

use crate::error::Result;
use crate::models::{Conversation, InsertOutcome, Message, StoredConversation};

/// Operations every backend implements with identical semantics.
pub trait ChatStore {
    /// Short backend label used in logs and reports.
    fn backend(&self) -> &'static str;

    /// Create tables and indexes if missing. Idempotent.
    fn ensure_schema(&mut self) -> impl Future<Output = Result<()>>;

    /// Drop both tables, messages first.
    fn drop_schema(&mut self) -> impl Future<Output = Result<()>>;

    /// Insert or update by `slug`.
    ///
    /// Fails with [`crate::Error::IdentityConflict`] when another slug already
    /// holds the conversation's `external_id`; nothing is written in that
    /// case.
    fn upsert_conversation(
        &mut self,
        conversation: &Conversation,
    ) -> impl Future<Output = Result<()>>;

    /// Store-local id of the conversation with `slug`, including one upserted
    /// in the open transaction.
    fn resolve_conversation_ref(&mut self, slug: &str) -> impl Future<Output = Result<i64>>;

    /// Insert a message unless `(conversation_ref, msg_id)` already exists.
    /// Messages without `msg_id` are always inserted.
    fn insert_message(
        &mut self,
        message: &Message,
        conversation_ref: i64,
    ) -> impl Future<Output = Result<InsertOutcome>>;

    /// Commit the open transaction, if any.
    fn commit(&mut self) -> impl Future<Output = Result<()>>;

    /// Roll back the open transaction, if any.
    fn rollback(&mut self) -> impl Future<Output = Result<()>>;

    fn count_conversations(&self) -> impl Future<Output = Result<i64>>;

    fn count_messages(&self) -> impl Future<Output = Result<i64>>;

    fn fetch_conversation(
        &self,
        slug: &str,
    ) -> impl Future<Output = Result<Option<StoredConversation>>>;

    /// Messages of the conversation with `slug`, in insertion order.
    fn fetch_messages(&self, slug: &str) -> impl Future<Output = Result<Vec<Message>>>;
}

/// Either backend, so a run can hold a mixed list of stores.
pub enum AnyStore {
    Sqlite(SqliteStore),
    Postgres(PostgresStore),
}

impl From<SqliteStore> for AnyStore {
    fn from(store: SqliteStore) -> Self {
        AnyStore::Sqlite(store)
    }
}

impl From<PostgresStore> for AnyStore {
    fn from(store: PostgresStore) -> Self {
        AnyStore::Postgres(store)
    }
}

impl AnyStore {
    /// Close the underlying pool.
    pub async fn close(self) {
        match self {
            AnyStore::Sqlite(store) => store.close().await,
            AnyStore::Postgres(store) => store.close().await,
        }
    }
}

impl ChatStore for AnyStore {
    fn backend(&self) -> &'static str {
        match self {
            AnyStore::Sqlite(store) => store.backend(),
            AnyStore::Postgres(store) => store.backend(),
        }
    }

    async fn ensure_schema(&mut self) -> Result<()> {
        match self {
            AnyStore::Sqlite(store) => store.ensure_schema().await,
            AnyStore::Postgres(store) => store.ensure_schema().await,
        }
    }

    async fn drop_schema(&mut self) -> Result<()> {
        match self {
            AnyStore::Sqlite(store) => store.drop_schema().await,
            AnyStore::Postgres(store) => store.drop_schema().await,
        }
    }

    async fn upsert_conversation(&mut self, conversation: &Conversation) -> Result<()> {
        match self {
            AnyStore::Sqlite(store) => store.upsert_conversation(conversation).await,
            AnyStore::Postgres(store) => store.upsert_conversation(conversation).await,
        }
    }

    async fn resolve_conversation_ref(&mut self, slug: &str) -> Result<i64> {
        match self {
            AnyStore::Sqlite(store) => store.resolve_conversation_ref(slug).await,
            AnyStore::Postgres(store) => store.resolve_conversation_ref(slug).await,
        }
    }

    async fn insert_message(
        &mut self,
        message: &Message,
        conversation_ref: i64,
    ) -> Result<InsertOutcome> {
        match self {
            AnyStore::Sqlite(store) => store.insert_message(message, conversation_ref).await,
            AnyStore::Postgres(store) => store.insert_message(message, conversation_ref).await,
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self {
            AnyStore::Sqlite(store) => store.commit().await,
            AnyStore::Postgres(store) => store.commit().await,
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self {
            AnyStore::Sqlite(store) => store.rollback().await,
            AnyStore::Postgres(store) => store.rollback().await,
        }
    }

    async fn count_conversations(&self) -> Result<i64> {
        match self {
            AnyStore::Sqlite(store) => store.count_conversations().await,
            AnyStore::Postgres(store) => store.count_conversations().await,
        }
    }

    async fn count_messages(&self) -> Result<i64> {
        match self {
            AnyStore::Sqlite(store) => store.count_messages().await,
            AnyStore::Postgres(store) => store.count_messages().await,
        }
    }

    async fn fetch_conversation(&self, slug: &str) -> Result<Option<StoredConversation>> {
        match self {
            AnyStore::Sqlite(store) => store.fetch_conversation(slug).await,
            AnyStore::Postgres(store) => store.fetch_conversation(slug).await,
        }
    }

    async fn fetch_messages(&self, slug: &str) -> Result<Vec<Message>> {
        match self {
            AnyStore::Sqlite(store) => store.fetch_messages(slug).await,
            AnyStore::Postgres(store) => store.fetch_messages(slug).await,
        }
    }
}
