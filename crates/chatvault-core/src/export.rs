//! JSON dump of extracted records.
//!
//! The dump is write-only: `conversations.json` holds every conversation seen
//! so far (replaced by slug on re-run) and `messages_<slug>.json` holds the
//! messages of one conversation as extracted.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{Conversation, Message};

const CONVERSATIONS_FILE: &str = "conversations.json";

/// Writes the JSON dump into one directory.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    dir: PathBuf,
}

impl JsonExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn conversations_path(&self) -> PathBuf {
        self.dir.join(CONVERSATIONS_FILE)
    }

    pub fn messages_path(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("messages_{slug}.json"))
    }

    /// Add or replace `conversation` in `conversations.json`.
    pub fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let path = self.conversations_path();
        let mut conversations: Vec<Conversation> = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };

        match conversations
            .iter_mut()
            .find(|existing| existing.slug == conversation.slug)
        {
            Some(existing) => existing.clone_from(conversation),
            None => conversations.push(conversation.clone()),
        }

        self.write(&path, &conversations)
    }

    /// Overwrite `messages_<slug>.json`.
    pub fn save_messages(&self, slug: &str, messages: &[Message]) -> Result<()> {
        self.write(&self.messages_path(slug), messages)
    }

    fn write<T: serde::Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(path, content)?;
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }
}
