//! Ingest pipeline: extraction into owned batches, then per-conversation
//! writes across every configured store.
//!
//! Preparation is synchronous and never touches a store. Writing follows a
//! stage-then-commit order per conversation: the conversation and its messages
//! are staged in each store's open transaction, and only when every store
//! staged cleanly are the transactions committed, one store after another.
//! A commit failure after an earlier store already committed leaves the
//! stores divergent for that conversation; the failure is reported with
//! `diverged` set and a re-run converges them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::annotate::Annotator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::export::JsonExporter;
use crate::extract::{ConversationExtractor, ExtractedConversation, MessageExtractor, parse_document};
use crate::models::{Conversation, InsertOutcome, Message};
use crate::slug::SlugGenerator;
use crate::store::{AnyStore, ChatStore};
use crate::temporal::TemporalNormalizer;

/// One conversation with its messages, ready to be written.
#[derive(Debug, Clone)]
pub struct ConversationBatch {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Extract and annotate every conversation of an HTML export.
pub fn prepare_batches(
    html: &str,
    config: &Config,
    annotator: &mut dyn Annotator,
) -> Result<Vec<ConversationBatch>> {
    let normalizer = TemporalNormalizer::from_config(&config.time)?;
    let mut conversations = ConversationExtractor::new(
        normalizer.clone(),
        SlugGenerator::new(config.slug.max_words),
    )?;
    let messages = MessageExtractor::new(normalizer)?;

    let document = parse_document(html);
    let extracted = conversations.extract(&document);
    if extracted.is_empty() {
        tracing::warn!("No captioned tables found in document");
    }

    let mut batches = Vec::with_capacity(extracted.len());
    for ExtractedConversation {
        mut conversation,
        table,
    } in extracted
    {
        annotator.annotate(&conversation)?.apply(&mut conversation);
        let messages = messages.extract(table, &conversation.slug);
        batches.push(ConversationBatch {
            conversation,
            messages,
        });
    }

    Ok(batches)
}

/// Committed message counts for one store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub backend: &'static str,
    pub conversations: usize,
    pub inserted: usize,
    /// Messages skipped because `(conversation_ref, msg_id)` was already stored.
    pub skipped: usize,
}

/// A conversation that did not commit everywhere.
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub slug: String,
    pub external_id: Option<i64>,
    /// Store that failed, when the failure is store-specific.
    pub store: Option<&'static str>,
    /// Position of the failing message within the conversation.
    pub message_ordinal: Option<usize>,
    /// Set when an earlier store had already committed the conversation.
    pub diverged: bool,
    pub error: String,
}

/// Outcome of one ingest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub attempted: usize,
    pub committed: usize,
    pub stores: Vec<StoreStats>,
    pub failures: Vec<UnitFailure>,
    /// The run stopped early on request; every earlier commit stands.
    pub interrupted: bool,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }

    pub fn has_divergence(&self) -> bool {
        self.failures.iter().any(|f| f.diverged)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    inserted: usize,
    skipped: usize,
}

struct StageError {
    store: &'static str,
    message_ordinal: Option<usize>,
    error: Error,
}

/// Writes prepared batches into every store.
pub struct Ingestor {
    stores: Vec<AnyStore>,
    interrupt: Arc<AtomicBool>,
    exporter: Option<JsonExporter>,
}

impl Ingestor {
    pub fn new(stores: Vec<AnyStore>) -> Self {
        Self {
            stores,
            interrupt: Arc::new(AtomicBool::new(false)),
            exporter: None,
        }
    }

    /// Share an interrupt flag; once set, the run stops before the next
    /// conversation.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Dump every processed conversation as JSON.
    pub fn with_exporter(mut self, exporter: JsonExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn stores(&self) -> &[AnyStore] {
        &self.stores
    }

    pub fn stores_mut(&mut self) -> &mut [AnyStore] {
        &mut self.stores
    }

    /// Create the schema in every store. Any failure is fatal for the run.
    pub async fn ensure_schema(&mut self) -> Result<()> {
        for store in &mut self.stores {
            store.ensure_schema().await?;
        }
        Ok(())
    }

    /// Ensure the schema, then write `batches` in order.
    ///
    /// Only schema setup returns an error; every later failure is recorded in
    /// the report and the run moves on to the next conversation.
    pub async fn ingest(&mut self, batches: &[ConversationBatch]) -> Result<IngestReport> {
        self.ensure_schema().await?;

        let mut report = IngestReport {
            stores: self
                .stores
                .iter()
                .map(|store| StoreStats {
                    backend: store.backend(),
                    ..StoreStats::default()
                })
                .collect(),
            ..IngestReport::default()
        };

        for batch in batches {
            if self.interrupt.load(Ordering::SeqCst) {
                tracing::warn!(
                    "Interrupted; stopping before '{}'",
                    batch.conversation.slug
                );
                report.interrupted = true;
                break;
            }
            report.attempted += 1;
            self.export(batch);

            let tallies = match self.stage(batch).await {
                Ok(tallies) => tallies,
                Err(staged) => {
                    self.rollback_all().await;
                    report.failures.push(UnitFailure {
                        slug: batch.conversation.slug.clone(),
                        external_id: batch.conversation.external_id,
                        store: Some(staged.store),
                        message_ordinal: staged.message_ordinal,
                        diverged: false,
                        error: staged.error.to_string(),
                    });
                    continue;
                }
            };

            if self.commit_all(batch, &tallies, &mut report).await {
                report.committed += 1;
                let inserted: Vec<String> = report
                    .stores
                    .iter()
                    .zip(&tallies)
                    .map(|(stats, tally)| {
                        format!(
                            "{} +{} ({} dup)",
                            stats.backend, tally.inserted, tally.skipped
                        )
                    })
                    .collect();
                tracing::info!(
                    "Committed '{}': {}",
                    batch.conversation.slug,
                    inserted.join(", ")
                );
            }
        }

        tracing::info!(
            "Ingest finished: {}/{} conversations committed, {} failures",
            report.committed,
            report.attempted,
            report.failures.len()
        );
        Ok(report)
    }

    /// Close every store.
    pub async fn close(self) {
        for store in self.stores {
            store.close().await;
        }
    }

    fn export(&self, batch: &ConversationBatch) {
        let Some(exporter) = &self.exporter else {
            return;
        };
        let slug = &batch.conversation.slug;
        if let Err(e) = exporter.save_conversation(&batch.conversation) {
            tracing::warn!("Failed to dump conversation '{slug}': {e}");
        }
        if let Err(e) = exporter.save_messages(slug, &batch.messages) {
            tracing::warn!("Failed to dump messages of '{slug}': {e}");
        }
    }

    async fn stage(&mut self, batch: &ConversationBatch) -> std::result::Result<Vec<Tally>, StageError> {
        let mut tallies = Vec::with_capacity(self.stores.len());
        for store in &mut self.stores {
            tallies.push(stage_one(store, batch).await?);
        }
        Ok(tallies)
    }

    /// Commit in store order. Returns whether every store committed.
    async fn commit_all(
        &mut self,
        batch: &ConversationBatch,
        tallies: &[Tally],
        report: &mut IngestReport,
    ) -> bool {
        let mut any_committed = false;
        let mut failed = false;

        for (index, store) in self.stores.iter_mut().enumerate() {
            if failed {
                if let Err(e) = store.rollback().await {
                    tracing::error!("[{}] Rollback failed: {e}", store.backend());
                }
                continue;
            }

            match store.commit().await {
                Ok(()) => {
                    any_committed = true;
                    if let (Some(stats), Some(tally)) =
                        (report.stores.get_mut(index), tallies.get(index))
                    {
                        stats.conversations += 1;
                        stats.inserted += tally.inserted;
                        stats.skipped += tally.skipped;
                    }
                }
                Err(e) => {
                    failed = true;
                    if any_committed {
                        tracing::error!(
                            "[{}] Commit of '{}' failed after earlier stores committed; stores diverge until re-run: {e}",
                            store.backend(),
                            batch.conversation.slug
                        );
                    } else {
                        tracing::error!(
                            "[{}] Commit of '{}' failed: {e}",
                            store.backend(),
                            batch.conversation.slug
                        );
                    }
                    report.failures.push(UnitFailure {
                        slug: batch.conversation.slug.clone(),
                        external_id: batch.conversation.external_id,
                        store: Some(store.backend()),
                        message_ordinal: None,
                        diverged: any_committed,
                        error: e.to_string(),
                    });
                }
            }
        }

        !failed
    }

    async fn rollback_all(&mut self) {
        for store in &mut self.stores {
            if let Err(e) = store.rollback().await {
                tracing::error!("[{}] Rollback failed: {e}", store.backend());
            }
        }
    }
}

async fn stage_one(
    store: &mut AnyStore,
    batch: &ConversationBatch,
) -> std::result::Result<Tally, StageError> {
    let backend = store.backend();
    let fail = |message_ordinal: Option<usize>, error: Error| {
        if error.is_unit_scoped() {
            tracing::warn!(
                "[{backend}] Skipping conversation '{}': {error}",
                batch.conversation.slug
            );
        } else {
            tracing::error!(
                "[{backend}] Store error on '{}': {error}",
                batch.conversation.slug
            );
        }
        StageError {
            store: backend,
            message_ordinal,
            error,
        }
    };

    store
        .upsert_conversation(&batch.conversation)
        .await
        .map_err(|e| fail(None, e))?;
    let conversation_ref = store
        .resolve_conversation_ref(&batch.conversation.slug)
        .await
        .map_err(|e| fail(None, e))?;

    let mut tally = Tally::default();
    for (ordinal, message) in batch.messages.iter().enumerate() {
        match store.insert_message(message, conversation_ref).await {
            Ok(InsertOutcome::Inserted) => tally.inserted += 1,
            Ok(InsertOutcome::Duplicate) => tally.skipped += 1,
            Err(e) => return Err(fail(Some(ordinal), e)),
        }
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{Annotation, DefaultAnnotator, FileAnnotations};

    const EXPORT: &str = r#"
        <html><body>
        <table>
            <caption><a href="https://t.me/project_x">Проєкт Х</a> (joined the group 01.03.2023)</caption>
            <tr><td><a href="https://t.me/project_x/1">1</a></td><td>01.03.2023 10:00</td><td>Hello</td></tr>
            <tr><td>abc</td><td>01.03.2023 10:05</td><td>No id</td></tr>
        </table>
        <table><tr><td>ignored</td></tr></table>
        <table>
            <caption>Book Club</caption>
            <tr><td>7</td><td>2024-01-02T08:00:00Z</td><td><p>One</p><p>Two</p></td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn prepare_builds_one_batch_per_captioned_table() {
        let batches =
            prepare_batches(EXPORT, &Config::default(), &mut DefaultAnnotator).expect("prepare");
        assert_eq!(batches.len(), 2);

        assert_eq!(batches[0].conversation.slug, "proiekt_kh");
        assert_eq!(batches[0].messages.len(), 2);
        assert_eq!(batches[0].messages[0].msg_id, Some(1));
        assert_eq!(batches[0].messages[1].msg_id, None);
        assert!(
            batches[0]
                .messages
                .iter()
                .all(|m| m.conversation_slug == "proiekt_kh")
        );

        assert_eq!(batches[1].conversation.slug, "book_club");
        assert_eq!(batches[1].messages[0].text.as_deref(), Some("One\n\nTwo"));
    }

    #[test]
    fn prepare_applies_annotations() {
        let mut annotations = FileAnnotations::default();
        annotations.insert(
            "book_club",
            Annotation {
                external_id: Some(77),
                is_active: false,
                is_member: true,
                is_public: true,
            },
        );

        let batches = prepare_batches(EXPORT, &Config::default(), &mut annotations).expect("prepare");
        let club = &batches[1].conversation;
        assert_eq!(club.external_id, Some(77));
        assert!(!club.is_active && !club.is_member && !club.is_public);
        assert_eq!(batches[0].conversation.external_id, None);
    }

    fn failure(slug: &str, diverged: bool) -> UnitFailure {
        UnitFailure {
            slug: slug.to_string(),
            external_id: None,
            store: Some("postgres"),
            message_ordinal: None,
            diverged,
            error: "connection reset".to_string(),
        }
    }

    #[test]
    fn report_flags_divergence_only_after_partial_commit() {
        let mut report = IngestReport::default();
        assert!(report.is_clean());
        assert!(!report.has_divergence());

        report.failures.push(failure("book_club", false));
        assert!(!report.is_clean());
        assert!(!report.has_divergence());

        report.failures.push(failure("rust_ua", true));
        assert!(report.has_divergence());
    }

    #[test]
    fn prepare_rejects_unknown_zone() {
        let mut config = Config::default();
        config.time.zone = "Mars/Olympus".to_string();
        assert!(matches!(
            prepare_batches(EXPORT, &config, &mut DefaultAnnotator),
            Err(Error::Config(_))
        ));
    }
}
