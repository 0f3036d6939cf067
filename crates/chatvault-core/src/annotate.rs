//! Operator-supplied conversation attributes.
//!
//! Extraction never asks anything. Attributes that only a person can supply
//! (the numeric external id and the activity flags) come from an
//! [`Annotator`], which the CLI backs with terminal prompts and tests back with
//! fixed data.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Conversation;

/// Attributes applied on top of an extracted conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotation {
    pub external_id: Option<i64>,
    pub is_active: bool,
    pub is_member: bool,
    pub is_public: bool,
}

impl Default for Annotation {
    fn default() -> Self {
        Self {
            external_id: None,
            is_active: true,
            is_member: true,
            is_public: true,
        }
    }
}

impl Annotation {
    /// Write the attributes into `conversation`. An inactive conversation is
    /// never a member or public.
    pub fn apply(self, conversation: &mut Conversation) {
        conversation.external_id = self.external_id;
        conversation.is_active = self.is_active;
        conversation.is_member = self.is_active && self.is_member;
        conversation.is_public = self.is_active && self.is_public;
    }
}

/// Source of per-conversation annotations.
pub trait Annotator {
    fn annotate(&mut self, conversation: &Conversation) -> Result<Annotation>;
}

/// Leaves every conversation active, member, public, without an external id.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAnnotator;

impl Annotator for DefaultAnnotator {
    fn annotate(&mut self, _conversation: &Conversation) -> Result<Annotation> {
        Ok(Annotation::default())
    }
}

/// Annotations keyed by slug, typically loaded from a TOML file:
///
/// ```toml
/// [conversations.proiekt_kh]
/// external_id = 1001
/// is_public = false
/// ```
///
/// Slugs missing from the map get [`Annotation::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAnnotations {
    #[serde(default)]
    pub conversations: HashMap<String, Annotation>,
}

impl FileAnnotations {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse annotations {}: {e}",
                path.display()
            ))
        })
    }

    pub fn insert(&mut self, slug: impl Into<String>, annotation: Annotation) {
        self.conversations.insert(slug.into(), annotation);
    }
}

impl Annotator for FileAnnotations {
    fn annotate(&mut self, conversation: &Conversation) -> Result<Annotation> {
        Ok(self
            .conversations
            .get(&conversation.slug)
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_clears_member_and_public() {
        let mut conv = Conversation::new("a", "A");
        Annotation {
            external_id: Some(5),
            is_active: false,
            is_member: true,
            is_public: true,
        }
        .apply(&mut conv);
        assert_eq!(conv.external_id, Some(5));
        assert!(!conv.is_active);
        assert!(!conv.is_member);
        assert!(!conv.is_public);
    }

    #[test]
    fn file_annotations_parse_partial_entries() {
        let mut annotations: FileAnnotations = toml::from_str(
            "[conversations.proiekt_kh]\nexternal_id = 1001\nis_public = false\n",
        )
        .expect("parse");

        let known = annotations
            .annotate(&Conversation::new("proiekt_kh", "Проєкт Х"))
            .expect("annotate");
        assert_eq!(known.external_id, Some(1001));
        assert!(known.is_active);
        assert!(!known.is_public);

        let unknown = annotations
            .annotate(&Conversation::new("other", "Other"))
            .expect("annotate");
        assert_eq!(unknown, Annotation::default());
    }

    #[test]
    fn load_reports_bad_files_as_config_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("annotations.toml");
        std::fs::write(&path, "conversations = 3").expect("write");
        assert!(matches!(FileAnnotations::load(&path), Err(Error::Config(_))));
    }
}
