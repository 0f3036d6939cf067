//! PostgreSQL backend.

use chrono::SubsecRound;
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::ChatStore;
use crate::error::{Error, Result};
use crate::models::{Conversation, InsertOutcome, Message, StoredConversation};
use crate::schema::{DROP_SCHEMA, POSTGRES_SCHEMA};

/// PostgreSQL store handle.
pub struct PostgresStore {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresStore {
    /// Connect to the server at `url`. The schema is not touched; call
    /// [`ChatStore::ensure_schema`].
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        tracing::debug!("Connected to PostgreSQL store");
        Ok(Self { pool, tx: None })
    }

    /// Close the pool, rolling back any open transaction.
    pub async fn close(mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                tracing::warn!("PostgreSQL rollback on close failed: {e}");
            }
        }
        self.pool.close().await;
    }

    async fn conn(&mut self) -> Result<&mut PgConnection> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(Error::Other(
                "PostgreSQL transaction unavailable".to_string(),
            )),
        }
    }
}

impl ChatStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_schema(&mut self) -> Result<()> {
        sqlx::raw_sql(POSTGRES_SCHEMA).execute(&self.pool).await?;
        tracing::debug!("[postgres] Ensured conversations/messages tables and indexes");
        Ok(())
    }

    async fn drop_schema(&mut self) -> Result<()> {
        self.rollback().await?;
        sqlx::raw_sql(DROP_SCHEMA).execute(&self.pool).await?;
        tracing::info!("[postgres] Dropped messages and conversations tables");
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
                "SELECT slug FROM conversations WHERE external_id = $1 AND slug <> $2 LIMIT 1",
            )
            .bind(external_id)
            .bind(&conversation.slug)
            .fetch_optional(&mut *conn)
            .await?;

            if let Some(claimed_by) = claimed_by {
                tracing::warn!(
                    "[postgres] external_id={external_id} already used by '{claimed_by}', rejecting '{}'",
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (slug) DO UPDATE SET
                external_id = EXCLUDED.external_id,
                type = EXCLUDED.type,
                name = EXCLUDED.name,
                link = EXCLUDED.link,
                joined = EXCLUDED.joined,
                is_active = EXCLUDED.is_active,
                is_member = EXCLUDED.is_member,
                is_public = EXCLUDED.is_public,
                notes = EXCLUDED.notes
            "#,
        )
        .bind(&conversation.slug)
        .bind(conversation.external_id)
        .bind(&conversation.kind)
        .bind(&conversation.name)
        .bind(&conversation.link)
        .bind(conversation.joined)
        .bind(conversation.is_active)
        .bind(conversation.is_member)
        .bind(conversation.is_public)
        .bind(&conversation.notes)
        .execute(&mut *conn)
        .await?;

        tracing::debug!("[postgres] Conversation upserted: '{}'", conversation.slug);
        Ok(())
    }

    async fn resolve_conversation_ref(&mut self, slug: &str) -> Result<i64> {
        let conn = self.conn().await?;
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM conversations WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&mut *conn)
            .await?;
        id.ok_or_else(|| Error::NotFound(format!("conversation '{slug}' in postgres")))
    }

    async fn insert_message(
        &mut self,
        message: &Message,
        conversation_ref: i64,
    ) -> Result<InsertOutcome> {
        let conn = self.conn().await?;

        if let Some(msg_id) = message.msg_id {
            let exists: Option<i32> = sqlx::query_scalar(
                "SELECT 1 FROM messages WHERE conversation_ref = $1 AND msg_id = $2 LIMIT 1",
            )
            .bind(conversation_ref)
            .bind(msg_id)
            .fetch_optional(&mut *conn)
            .await?;

            if exists.is_some() {
                tracing::debug!(
                    "[postgres] Duplicate msg_id={msg_id} in conversation_ref={conversation_ref}, skipping"
                );
                return Ok(InsertOutcome::Duplicate);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO messages (msg_id, conversation_ref, timestamp, link, text, media, screenshot, tags, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.msg_id)
        .bind(conversation_ref)
        .bind(message.timestamp.map(|ts| ts.trunc_subsecs(0)))
        .bind(&message.link)
        .bind(&message.text)
        .bind(Json(&message.media))
        .bind(&message.screenshot)
        .bind(Json(&message.tags))
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
        let row = sqlx::query("SELECT * FROM conversations WHERE slug = $1")
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
            WHERE c.slug = $1
            ORDER BY m.id
            "#,
        )
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

fn conversation_from_row(row: &PgRow) -> Result<StoredConversation> {
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
            joined: row.try_get("joined")?,
            is_active: row.try_get::<Option<bool>, _>("is_active")?.unwrap_or(true),
            is_member: row.try_get::<Option<bool>, _>("is_member")?.unwrap_or(true),
            is_public: row.try_get::<Option<bool>, _>("is_public")?.unwrap_or(true),
            notes: row.try_get("notes")?,
        },
    })
}

fn message_from_row(row: &PgRow) -> Result<Message> {
    let media: Json<Vec<String>> = row.try_get("media")?;
    let tags: Json<Vec<String>> = row.try_get("tags")?;
    Ok(Message {
        msg_id: row.try_get("msg_id")?,
        conversation_slug: row.try_get("conversation_slug")?,
        timestamp: row.try_get("timestamp")?,
        link: row.try_get("link")?,
        text: row.try_get("text")?,
        media: media.0,
        screenshot: row.try_get("screenshot")?,
        tags: tags.0,
        notes: row.try_get("notes")?,
    })
}
