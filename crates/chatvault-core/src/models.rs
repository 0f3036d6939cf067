//! Domain models for extracted conversations and messages.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A conversation extracted from one captioned table of the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Natural key, unique across the run and the stores.
    pub slug: String,
    /// User-supplied numeric identifier, unique when present.
    pub external_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: String,
    pub link: Option<String>,
    pub joined: Option<NaiveDate>,
    pub is_active: bool,
    pub is_member: bool,
    pub is_public: bool,
    pub notes: Option<String>,
}

impl Conversation {
    /// A conversation with default flags and no annotations.
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            external_id: None,
            kind: None,
            name: name.into(),
            link: None,
            joined: None,
            is_active: true,
            is_member: true,
            is_public: true,
            notes: None,
        }
    }
}

/// A message extracted from one three-cell table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Numeric id from the source; `None` when the id cell is not purely digits.
    pub msg_id: Option<i64>,
    /// Slug of the owning conversation. Stores key messages by their own
    /// conversation ref, resolved after the conversation upsert.
    pub conversation_slug: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub link: Option<String>,
    pub text: Option<String>,
    pub media: Vec<String>,
    pub screenshot: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl Message {
    pub fn new(conversation_slug: impl Into<String>) -> Self {
        Self {
            msg_id: None,
            conversation_slug: conversation_slug.into(),
            timestamp: None,
            link: None,
            text: None,
            media: Vec::new(),
            screenshot: None,
            tags: Vec::new(),
            notes: None,
        }
    }
}

/// Result of a message insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// `(conversation_ref, msg_id)` already stored; nothing written.
    Duplicate,
}

/// A conversation as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConversation {
    pub id: i64,
    pub conversation: Conversation,
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
