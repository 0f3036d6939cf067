//! SQLite backend.

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};

use super::ChatStore;
use crate::error::{Error, Result};
use crate::models::{Conversation, InsertOutcome, Message, StoredConversation};
use crate::schema::{DROP_SCHEMA, SQLITE_SCHEMA};
use crate::temporal::{DATE_FORMAT, format_canonical, parse_canonical};

/// SQLite store handle.
pub struct SqliteStore {
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteStore {
    /// Open or create a database at the given path. The schema is not
    /// touched; call [`ChatStore::ensure_schema`].
    pub async fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        tracing::debug!("Opened SQLite store at {}", path.display());
        Ok(Self { pool, tx: None })
    }

    /// Close the database, rolling back any open transaction.
    pub async fn close(mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                tracing::warn!("SQLite rollback on close failed: {e}");
            }
        }
        self.pool.close().await;
    }

    /// Connection of the open transaction, beginning one if needed.
    async fn conn(&mut self) -> Result<&mut SqliteConnection> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(Error::Other("SQLite transaction unavailable".to_string())),
        }
    }
}

impl ChatStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_schema(&mut self) -> Result<()> {
        sqlx::raw_sql(SQLITE_SCHEMA).execute(&self.pool).await?;
        tracing::debug!("[sqlite] Ensured conversations/messages tables and indexes");
        Ok(())
    }

    async fn drop_schema(&mut self) -> Result<()> {
        self.rollback().await?;
        sqlx::raw_sql(DROP_SCHEMA).execute(&self.pool).await?;
        tracing::info!("[sqlite] Dropped messages and conversations tables");
        Ok(())
    }

    async fn upsert_conversation(&mut self, conversation: &Conversation) -> Result<()> {
        if conversation.slug.trim().is_empty() {
            return Err(Error::MalformedInput(format!(
                "conversation '{}' has no slug",
                conversation.name
            )));
        }

        let conn = self.conn().await?;

        if let Some(external_id) = conversation.external_id {
            let claimed_by: Option<String> = sqlx::query_scalar(
                "SELECT slug FROM conversations WHERE external_id = ? AND slug != ? LIMIT 1",
            )
            .bind(external_id)
            .bind(&conversation.slug)
            .fetch_optional(&mut *conn)
            .await?;

            if let Some(claimed_by) = claimed_by {
                tracing::warn!(
                    "[sqlite] external_id={external_id} already used by '{claimed_by}', rejecting '{}'",
                    conversation.slug
                );
                return Err(Error::IdentityConflict {
                    external_id,
                    slug: conversation.slug.clone(),
                    claimed_by,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO conversations (slug, external_id, type, name, link, joined, is_active, is_member, is_public, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                external_id = excluded.external_id,
                type = excluded.type,
                name = excluded.name,
                link = excluded.link,
                joined = excluded.joined,
                is_active = excluded.is_active,
                is_member = excluded.is_member,
                is_public = excluded.is_public,
                notes = excluded.notes
            "#,
        )
        .bind(&conversation.slug)
        .bind(conversation.external_id)
        .bind(&conversation.kind)
        .bind(&conversation.name)
        .bind(&conversation.link)
        .bind(conversation.joined.map(|d| d.format(DATE_FORMAT).to_string()))
        .bind(conversation.is_active)
        .bind(conversation.is_member)
        .bind(conversation.is_public)
        .bind(&conversation.notes)
        .execute(&mut *conn)
        .await?;

        tracing::debug!("[sqlite] Conversation upserted: '{}'", conversation.slug);
        Ok(())
    }

    async fn resolve_conversation_ref(&mut self, slug: &str) -> Result<i64> {
        let conn = self.conn().await?;
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM conversations WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&mut *conn)
            .await?;
        id.ok_or_else(|| Error::NotFound(format!("conversation '{slug}' in sqlite")))
    }

    async fn insert_message(
        &mut self,
        message: &Message,
        conversation_ref: i64,
    ) -> Result<InsertOutcome> {
        let media = serde_json::to_string(&message.media)?;
        let tags = serde_json::to_string(&message.tags)?;
        let conn = self.conn().await?;

        if let Some(msg_id) = message.msg_id {
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM messages WHERE conversation_ref = ? AND msg_id = ? LIMIT 1",
            )
            .bind(conversation_ref)
            .bind(msg_id)
            .fetch_optional(&mut *conn)
            .await?;

            if exists.is_some() {
                tracing::debug!(
                    "[sqlite] Duplicate msg_id={msg_id} in conversation_ref={conversation_ref}, skipping"
                );
                return Ok(InsertOutcome::Duplicate);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO messages (msg_id, conversation_ref, timestamp, link, text, media, screenshot, tags, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.msg_id)
        .bind(conversation_ref)
        .bind(message.timestamp.as_ref().map(format_canonical))
        .bind(&message.link)
        .bind(&message.text)
        .bind(media)
        .bind(&message.screenshot)
        .bind(tags)
        .bind(&message.notes)
        .execute(&mut *conn)
        .await?;

        Ok(InsertOutcome::Inserted)
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn count_conversations(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn count_messages(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn fetch_conversation(&self, slug: &str) -> Result<Option<StoredConversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn fetch_messages(&self, slug: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT m.*, c.slug AS conversation_slug
            FROM messages m
            JOIN conversations c ON c.id = m.conversation_ref
            WHERE c.slug = ?
            ORDER BY m.id
            "#,
        )
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

fn conversation_from_row(row: &SqliteRow) -> Result<StoredConversation> {
    Ok(StoredConversation {
        id: row.try_get("id")?,
        conversation: Conversation {
            slug: row.try_get("slug")?,
            external_id: row.try_get("external_id")?,
            kind: row.try_get("type")?,
            name: row
                .try_get::<Option<String>, _>("name")?
                .unwrap_or_default(),
            link: row.try_get("link")?,
            joined: row
                .try_get::<Option<String>, _>("joined")?
                .and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok()),
            is_active: row.try_get::<Option<bool>, _>("is_active")?.unwrap_or(true),
            is_member: row.try_get::<Option<bool>, _>("is_member")?.unwrap_or(true),
            is_public: row.try_get::<Option<bool>, _>("is_public")?.unwrap_or(true),
            notes: row.try_get("notes")?,
        },
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        msg_id: row.try_get("msg_id")?,
        conversation_slug: row.try_get("conversation_slug")?,
        timestamp: row
            .try_get::<Option<String>, _>("timestamp")?
            .and_then(|s| parse_canonical(&s)),
        link: row.try_get("link")?,
        text: row.try_get("text")?,
        media: row
            .try_get::<Option<String>, _>("media")?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        screenshot: row.try_get("screenshot")?,
        tags: row
            .try_get::<Option<String>, _>("tags")?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        notes: row.try_get("notes")?,
    })
}
