use regex::Regex;
use scraper::ElementRef;

use super::{Selectors, pattern};
use crate::error::Result;
use crate::models::Message;
use crate::temporal::TemporalNormalizer;

/// Longest id parsed as a number; ten digits always fit in an `i64`.
const MAX_ID_DIGITS: usize = 10;

/// Elements that start a new paragraph in a message body.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "blockquote", "pre", "h1", "h2", "h3", "h4", "h5", "h6",
    "table", "tr", "td", "hr", "section", "article", "header", "footer",
];

/// Builds message records from the rows of one conversation table.
#[derive(Debug, Clone)]
pub struct MessageExtractor {
    normalizer: TemporalNormalizer,
    selectors: Selectors,
    line_break_padding: Regex,
}

impl MessageExtractor {
    pub fn new(normalizer: TemporalNormalizer) -> Result<Self> {
        Ok(Self {
            normalizer,
            selectors: Selectors::new()?,
            line_break_padding: pattern(r"[ \t]*(\n+)[ \t]*")?,
        })
    }

    /// Extract messages in row order. Rows without exactly three cells are
    /// skipped.
    pub fn extract(&self, table: ElementRef<'_>, conversation_slug: &str) -> Vec<Message> {
        let mut messages = Vec::new();

        for (ordinal, row) in table.select(&self.selectors.row).enumerate() {
            let cells: Vec<ElementRef<'_>> = row.select(&self.selectors.cell).collect();
            let [id_cell, time_cell, body_cell] = cells.as_slice() else {
                tracing::debug!(
                    "Skipping row {ordinal} in '{conversation_slug}': {} cells",
                    cells.len()
                );
                continue;
            };

            let id_link = id_cell.select(&self.selectors.anchor).next();
            let link_text = id_link.map(|a| a.text().collect::<String>().trim().to_string());
            let raw_id = match link_text {
                Some(text) if !text.is_empty() => text,
                _ => id_cell.text().collect::<String>().trim().to_string(),
            };

            let mut message = Message::new(conversation_slug);
            message.msg_id = parse_msg_id(&raw_id);
            message.link = id_link
                .and_then(|a| a.value().attr("href"))
                .map(ToOwned::to_owned);
            message.timestamp = self
                .normalizer
                .instant(&time_cell.text().collect::<String>());
            message.text = Some(self.body_text(*body_cell)).filter(|text| !text.is_empty());

            if message.msg_id.is_none() {
                tracing::debug!(
                    "Row {ordinal} in '{conversation_slug}' has non-numeric id {raw_id:?}"
                );
            }
            messages.push(message);
        }

        tracing::info!(
            "Extracted {} messages from '{conversation_slug}'",
            messages.len()
        );
        messages
    }

    /// Body text with paragraphs separated by a blank line and the spaces
    /// around line breaks removed.
    fn body_text(&self, cell: ElementRef<'_>) -> String {
        let mut blocks = Blocks::default();
        blocks.walk(cell);
        blocks.flush();
        let joined = blocks.done.join("\n\n");
        self.line_break_padding
            .replace_all(&joined, "$1")
            .into_owned()
    }
}

/// Purely decimal ids of bounded length become numbers; anything else is
/// dropped.
fn parse_msg_id(raw: &str) -> Option<i64> {
    if raw.is_empty() || raw.len() > MAX_ID_DIGITS || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[derive(Debug, Default)]
struct Blocks {
    done: Vec<String>,
    current: String,
}

impl Blocks {
    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                self.current.push_str(text);
                continue;
            }
            let Some(child) = ElementRef::wrap(child) else {
                continue;
            };
            match child.value().name() {
                "br" => self.current.push('\n'),
                "script" | "style" => {}
                name if BLOCK_TAGS.contains(&name) => {
                    self.flush();
                    self.walk(child);
                    self.flush();
                }
                _ => self.walk(child),
            }
        }
    }

    fn flush(&mut self) {
        let trimmed = self.current.trim();
        if !trimmed.is_empty() {
            self.done.push(trimmed.to_string());
        }
        self.current.clear();
    }
}
