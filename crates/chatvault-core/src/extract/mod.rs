//! Extraction of conversations and messages from an HTML chat export.
//!
//! The export holds one `<table>` per conversation. The `<caption>` carries
//! the conversation name (optionally as a link) and a "joined the group"
//! marker; each data row has exactly three cells: id, timestamp, body.

mod conversations;
mod messages;

pub use conversations::{ConversationExtractor, ExtractedConversation};
pub use messages::MessageExtractor;

use scraper::{Html, Selector};

use crate::error::{Error, Result};

/// Parse an export document.
pub fn parse_document(html: &str) -> Html {
    Html::parse_document(html)
}

/// CSS selectors shared by both extractors.
#[derive(Debug, Clone)]
pub(crate) struct Selectors {
    pub table: Selector,
    pub caption: Selector,
    pub anchor: Selector,
    pub row: Selector,
    pub cell: Selector,
}

impl Selectors {
    pub fn new() -> Result<Self> {
        Ok(Self {
            table: selector("table")?,
            caption: selector("caption")?,
            anchor: selector("a")?,
            row: selector("tr")?,
            cell: selector("td")?,
        })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Other(format!("Invalid selector '{css}': {e}")))
}

fn pattern(re: &str) -> Result<regex::Regex> {
    regex::Regex::new(re).map_err(|e| Error::Other(format!("Invalid pattern '{re}': {e}")))
}
