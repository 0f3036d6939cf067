use regex::Regex;
use scraper::{ElementRef, Html};

use super::{Selectors, pattern};
use crate::error::Result;
use crate::models::Conversation;
use crate::slug::SlugGenerator;
use crate::temporal::TemporalNormalizer;

/// A conversation together with the table its messages come from.
#[derive(Debug, Clone)]
pub struct ExtractedConversation<'a> {
    pub conversation: Conversation,
    pub table: ElementRef<'a>,
}

/// Walks captioned tables and builds conversation records.
///
/// The slug generator lives as long as the extractor, so every slug handed
/// out during one run is unique.
#[derive(Debug, Clone)]
pub struct ConversationExtractor {
    normalizer: TemporalNormalizer,
    slugs: SlugGenerator,
    selectors: Selectors,
    joined_date: Regex,
    joined_marker: Regex,
}

impl ConversationExtractor {
    pub fn new(normalizer: TemporalNormalizer, slugs: SlugGenerator) -> Result<Self> {
        Ok(Self {
            normalizer,
            slugs,
            selectors: Selectors::new()?,
            joined_date: pattern(r"joined the group\s+(\d{1,2}[./]\d{1,2}[./]\d{2,4})")?,
            joined_marker: pattern(
                r"\s*(?:\(joined the group[^)]*\)|joined the group\s+\d{1,2}[./]\d{1,2}[./]\d{2,4})",
            )?,
        })
    }

    /// Extract every captioned table in document order.
    pub fn extract<'a>(&mut self, document: &'a Html) -> Vec<ExtractedConversation<'a>> {
        let mut extracted = Vec::new();
        let tables: Vec<ElementRef<'a>> = document.select(&self.selectors.table).collect();

        for (index, table) in tables.into_iter().enumerate() {
            let Some(caption) = table.select(&self.selectors.caption).next() else {
                tracing::debug!("Skipping table #{index}: no caption");
                continue;
            };

            let conversation = self.conversation_from_caption(caption);
            tracing::info!(
                "Extracted conversation '{}' ({}), joined {}",
                conversation.slug,
                conversation.name,
                conversation
                    .joined
                    .map_or_else(|| "-".to_string(), |d| d.to_string())
            );
            extracted.push(ExtractedConversation {
                conversation,
                table,
            });
        }

        extracted
    }

    fn conversation_from_caption(&mut self, caption: ElementRef<'_>) -> Conversation {
        let caption_text = caption.text().collect::<String>().trim().to_string();
        let link_tag = caption.select(&self.selectors.anchor).next();

        let raw_name = link_tag.map_or_else(
            || caption_text.clone(),
            |a| a.text().collect::<String>().trim().to_string(),
        );
        let name = self.joined_marker.replace_all(&raw_name, "").trim().to_string();

        let joined = self
            .joined_date
            .captures(&caption_text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| self.normalizer.date(m.as_str()));

        let mut conversation = Conversation::new(self.slugs.generate(&name), name);
        conversation.link = link_tag
            .and_then(|a| a.value().attr("href"))
            .map(ToOwned::to_owned);
        conversation.joined = joined;
        conversation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::parse_document;
    use chrono::NaiveDate;

    fn extractor() -> ConversationExtractor {
        ConversationExtractor::new(
            TemporalNormalizer::new(chrono_tz::Europe::Kyiv, true),
            SlugGenerator::new(3),
        )
        .expect("extractor")
    }

    #[test]
    fn caption_text_with_joined_marker() {
        let doc = parse_document(
            "<table><caption>Проєкт Х (joined the group 01.03.2023)</caption></table>",
        );
        let chats = extractor().extract(&doc);
        assert_eq!(chats.len(), 1);
        let conv = &chats[0].conversation;
        assert_eq!(conv.name, "Проєкт Х");
        assert_eq!(conv.slug, "proiekt_kh");
        assert_eq!(conv.joined, NaiveDate::from_ymd_opt(2023, 3, 1));
        assert!(conv.link.is_none());
    }

    #[test]
    fn linked_caption_uses_anchor_text_and_href() {
        let doc = parse_document(
            r#"<table><caption><a href="https://t.me/rustaceans">Rustaceans UA</a>
               (joined the group 15/11/2022)</caption></table>"#,
        );
        let chats = extractor().extract(&doc);
        let conv = &chats[0].conversation;
        assert_eq!(conv.name, "Rustaceans UA");
        assert_eq!(conv.slug, "rustaceans_ua");
        assert_eq!(conv.link.as_deref(), Some("https://t.me/rustaceans"));
        assert_eq!(conv.joined, NaiveDate::from_ymd_opt(2022, 11, 15));
    }

    #[test]
    fn unparenthesized_marker_is_stripped() {
        let doc = parse_document(
            "<table><caption>Book Club joined the group 02.01.2024</caption></table>",
        );
        let chats = extractor().extract(&doc);
        assert_eq!(chats[0].conversation.name, "Book Club");
        assert_eq!(
            chats[0].conversation.joined,
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
    }

    #[test]
    fn tables_without_caption_are_skipped() {
        let doc = parse_document(
            "<table><tr><td>1</td></tr></table><table><caption>Kept</caption></table>",
        );
        let chats = extractor().extract(&doc);
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].conversation.slug, "kept");
    }

    #[test]
    fn interleaved_tables_keep_document_order() {
        let doc = parse_document(
            r#"<table><caption>First</caption><tr><td>cell-one</td></tr></table>
               <table><tr><td>skip</td></tr></table>
               <table><caption>Second (joined the group 05.06.2021)</caption>
                 <tr><td>cell-two</td></tr></table>"#,
        );
        let mut extractor = extractor();
        let chats = extractor.extract(&doc);
        let slugs: Vec<_> = chats.iter().map(|c| c.conversation.slug.as_str()).collect();
        assert_eq!(slugs, vec!["first", "second"]);
        assert_eq!(chats[1].conversation.joined, NaiveDate::from_ymd_opt(2021, 6, 5));

        let cells: Vec<String> = chats
            .iter()
            .map(|c| c.table.text().collect::<String>())
            .collect();
        assert!(cells[0].contains("cell-one") && !cells[0].contains("cell-two"));
        assert!(cells[1].contains("cell-two"));

        // The generator persists across calls on the same extractor.
        let again = extractor.extract(&doc);
        assert_ne!(again[0].conversation.slug, "first");
        assert!(again[0].conversation.slug.starts_with("first_"));
    }

    #[test]
    fn duplicate_names_get_unique_slugs() {
        let doc = parse_document(
            "<table><caption>General</caption></table><table><caption>General!</caption></table>",
        );
        let chats = extractor().extract(&doc);
        assert_eq!(chats[0].conversation.slug, "general");
        assert_ne!(chats[1].conversation.slug, "general");
        assert!(chats[1].conversation.slug.starts_with("general_"));
    }

    #[test]
    fn defaults_to_active_member_public() {
        let doc = parse_document("<table><caption>Chat</caption></table>");
        let chats = extractor().extract(&doc);
        let conv = &chats[0].conversation;
        assert!(conv.is_active && conv.is_member && conv.is_public);
        assert!(conv.joined.is_none());
    }
}
