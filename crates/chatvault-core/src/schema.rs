//! Database schema for chatvault.
//!
//! Both backends hold the same two tables. Message identity is
//! `(conversation_ref, msg_id)`, enforced only where `msg_id` is present.

/// SQLite schema. Dates and instants are stored as canonical text, JSON
/// collections as text.
pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT UNIQUE NOT NULL,
    external_id INTEGER,
    type TEXT,
    name TEXT,
    link TEXT,
    joined TEXT,
    is_active BOOLEAN,
    is_member BOOLEAN,
    is_public BOOLEAN,
    notes TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_external_id
    ON conversations(external_id)
    WHERE external_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    msg_id INTEGER,
    conversation_ref INTEGER NOT NULL
        REFERENCES conversations(id) ON DELETE CASCADE,
    timestamp TEXT,
    link TEXT,
    text TEXT,
    media TEXT NOT NULL DEFAULT '[]',
    screenshot TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    notes TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_conversation_msg_id
    ON messages(conversation_ref, msg_id)
    WHERE msg_id IS NOT NULL;
"#;

/// PostgreSQL schema.
pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id BIGSERIAL PRIMARY KEY,
    slug TEXT UNIQUE NOT NULL,
    external_id BIGINT,
    type TEXT,
    name TEXT,
    link TEXT,
    joined DATE,
    is_active BOOLEAN,
    is_member BOOLEAN,
    is_public BOOLEAN,
    notes TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_external_id
    ON conversations(external_id)
    WHERE external_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS messages (
    id BIGSERIAL PRIMARY KEY,
    msg_id BIGINT,
    conversation_ref BIGINT NOT NULL
        REFERENCES conversations(id) ON DELETE CASCADE,
    timestamp TIMESTAMPTZ,
    link TEXT,
    text TEXT,
    media JSONB NOT NULL DEFAULT '[]'::jsonb,
    screenshot TEXT,
    tags JSONB NOT NULL DEFAULT '[]'::jsonb,
    notes TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_conversation_msg_id
    ON messages(conversation_ref, msg_id)
    WHERE msg_id IS NOT NULL;
"#;

/// Drops both tables; shared by the two backends.
pub const DROP_SCHEMA: &str = r#"
DROP TABLE IF EXISTS messages;
DROP TABLE IF EXISTS conversations;
"#;
