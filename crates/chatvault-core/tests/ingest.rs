//! End-to-end ingest into two SQLite stores, and into SQLite plus PostgreSQL
//! when `CHATVAULT_TEST_DATABASE_URL` points at a scratch database.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chatvault_core::annotate::{Annotation, DefaultAnnotator, FileAnnotations};
use chatvault_core::export::JsonExporter;
use chatvault_core::ingest::{ConversationBatch, prepare_batches};
use chatvault_core::models::Conversation;
use chatvault_core::{AnyStore, ChatStore, Config, Ingestor, PostgresStore, SqliteStore};
use chrono::{NaiveDate, TimeZone, Utc};
use uuid::Uuid;

const EXPORT: &str = r#"<!DOCTYPE html>
<html><body>
<table>
    <caption><a href="https://t.me/project_x">Проєкт Х</a> (joined the group 01.03.2023)</caption>
    <tr><td><a href="https://t.me/project_x/1">1</a></td><td>01.03.2023 10:00</td><td>Hello</td></tr>
    <tr><td><a href="https://t.me/project_x/2">2</a></td><td>01.03.2023 10:05</td><td><p>First</p><p>Second</p></td></tr>
    <tr><td>3</td><td>not a date</td><td></td></tr>
</table>
<table>
    <caption>Book Club</caption>
    <tr><td>10</td><td>2024-01-02T08:00:00Z</td><td>Chapter one</td></tr>
    <tr><td>11</td><td>02.01.2024 12:00</td><td>Chapter two</td></tr>
</table>
<table>
    <caption>Rust UA joined the group 15.11.2022</caption>
    <tr><td>100</td><td>15.11.2022 09:00</td><td>Привіт</td></tr>
</table>
</body></html>
"#;

const ZONED: &str = r"<table>
    <caption>Time Zones</caption>
    <tr><td>1</td><td>2024-03-15T10:30:00.750Z</td><td>fractional</td></tr>
    <tr><td>2</td><td>01.03.2023 10:00 +02:00</td><td>offset</td></tr>
    <tr><td>3</td><td>01.03.2023 10:00:15 UTC+02:00</td><td>labelled offset</td></tr>
    <tr><td>4</td><td>01-Mar-2023 10:00</td><td>month name</td></tr>
</table>";

fn temp_db_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let filename = format!("chatvault-ingest-{}.db", Uuid::new_v4());
    path.push(filename);
    path
}

async fn two_store_ingestor() -> Ingestor {
    let first = SqliteStore::open(&temp_db_path()).await.expect("open first");
    let second = SqliteStore::open(&temp_db_path()).await.expect("open second");
    Ingestor::new(vec![AnyStore::from(first), AnyStore::from(second)])
}

fn batches() -> Vec<ConversationBatch> {
    prepare_batches(EXPORT, &Config::default(), &mut DefaultAnnotator).expect("prepare")
}

fn all_batches() -> Vec<ConversationBatch> {
    let mut all = batches();
    all.extend(prepare_batches(ZONED, &Config::default(), &mut DefaultAnnotator).expect("prepare"));
    all
}

const SLUGS: [&str; 4] = ["proiekt_kh", "book_club", "rust_ua", "time_zones"];

async fn assert_stores_agree(first: &AnyStore, second: &AnyStore) {
    assert_eq!(
        first.count_conversations().await.expect("count"),
        second.count_conversations().await.expect("count")
    );
    assert_eq!(
        first.count_messages().await.expect("count"),
        second.count_messages().await.expect("count")
    );
    for slug in SLUGS {
        let a = first
            .fetch_conversation(slug)
            .await
            .expect("fetch")
            .expect("exists in first");
        let b = second
            .fetch_conversation(slug)
            .await
            .expect("fetch")
            .expect("exists in second");
        assert_eq!(a.conversation, b.conversation, "{slug}");
        assert_eq!(
            first.fetch_messages(slug).await.expect("fetch"),
            second.fetch_messages(slug).await.expect("fetch"),
            "{slug}"
        );
    }
}

#[tokio::test]
async fn rerun_keeps_row_counts() {
    let mut ingestor = two_store_ingestor().await;
    let batches = batches();

    let first = ingestor.ingest(&batches).await.expect("first run");
    assert!(first.is_clean());
    assert_eq!(first.attempted, 3);
    assert_eq!(first.committed, 3);
    for stats in &first.stores {
        assert_eq!(stats.backend, "sqlite");
        assert_eq!(stats.conversations, 3);
        assert_eq!(stats.inserted, 6);
        assert_eq!(stats.skipped, 0);
    }

    let second = ingestor.ingest(&batches).await.expect("second run");
    assert!(second.is_clean());
    assert_eq!(second.committed, 3);
    for stats in &second.stores {
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.skipped, 6);
    }

    for store in ingestor.stores() {
        assert_eq!(store.count_conversations().await.expect("count"), 3);
        assert_eq!(store.count_messages().await.expect("count"), 6);
    }
}

#[tokio::test]
async fn both_stores_hold_the_same_records() {
    let mut ingestor = two_store_ingestor().await;
    ingestor.ingest(&batches()).await.expect("ingest");

    let [first, second] = ingestor.stores() else {
        unreachable!("two stores configured");
    };
    for slug in ["proiekt_kh", "book_club", "rust_ua"] {
        let a = first
            .fetch_conversation(slug)
            .await
            .expect("fetch")
            .expect("exists in first");
        let b = second
            .fetch_conversation(slug)
            .await
            .expect("fetch")
            .expect("exists in second");
        assert_eq!(a.conversation, b.conversation);
        assert_eq!(
            first.fetch_messages(slug).await.expect("fetch"),
            second.fetch_messages(slug).await.expect("fetch")
        );
    }
}

#[tokio::test]
async fn zoned_and_fractional_timestamps_are_canonical() {
    let mut ingestor = two_store_ingestor().await;
    let report = ingestor.ingest(&all_batches()).await.expect("ingest");
    assert!(report.is_clean());

    let [first, second] = ingestor.stores() else {
        unreachable!("two stores configured");
    };
    assert_stores_agree(first, second).await;

    let stamps: Vec<_> = first
        .fetch_messages("time_zones")
        .await
        .expect("messages")
        .into_iter()
        .map(|m| m.timestamp)
        .collect();
    assert_eq!(
        stamps,
        vec![
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).single(),
            Utc.with_ymd_and_hms(2023, 3, 1, 8, 0, 0).single(),
            Utc.with_ymd_and_hms(2023, 3, 1, 8, 0, 15).single(),
            Utc.with_ymd_and_hms(2023, 3, 1, 8, 0, 0).single(),
        ]
    );
}

#[tokio::test]
async fn sqlite_and_postgres_stay_equivalent() {
    let Ok(url) = std::env::var("CHATVAULT_TEST_DATABASE_URL") else {
        eprintln!("CHATVAULT_TEST_DATABASE_URL not set; skipping PostgreSQL ingest");
        return;
    };

    let sqlite = SqliteStore::open(&temp_db_path()).await.expect("open sqlite");
    let mut postgres = PostgresStore::connect(&url).await.expect("connect");
    postgres.drop_schema().await.expect("reset");
    let mut ingestor = Ingestor::new(vec![AnyStore::from(sqlite), AnyStore::from(postgres)]);
    let batches = all_batches();

    let first = ingestor.ingest(&batches).await.expect("first run");
    assert!(first.is_clean());
    assert_eq!(first.committed, 4);
    let backends: Vec<_> = first.stores.iter().map(|s| s.backend).collect();
    assert_eq!(backends, vec!["sqlite", "postgres"]);
    assert_eq!(first.stores[0].inserted, first.stores[1].inserted);

    let second = ingestor.ingest(&batches).await.expect("second run");
    assert!(second.is_clean());
    for stats in &second.stores {
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.skipped, first.stores[0].inserted);
    }

    {
        let [sqlite, postgres] = ingestor.stores() else {
            unreachable!("two stores configured");
        };
        assert_eq!(sqlite.count_conversations().await.expect("count"), 4);
        assert_eq!(sqlite.count_messages().await.expect("count"), 10);
        assert_stores_agree(sqlite, postgres).await;
    }

    ingestor.stores_mut()[1].drop_schema().await.expect("drop");
    ingestor.close().await;
}

#[tokio::test]
async fn caption_metadata_is_stored() {
    let mut ingestor = two_store_ingestor().await;
    ingestor.ingest(&batches()).await.expect("ingest");
    let store = &ingestor.stores()[0];

    let stored = store
        .fetch_conversation("proiekt_kh")
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(stored.conversation.name, "Проєкт Х");
    assert_eq!(stored.conversation.joined, NaiveDate::from_ymd_opt(2023, 3, 1));
    assert_eq!(
        stored.conversation.link.as_deref(),
        Some("https://t.me/project_x")
    );

    let messages = store.fetch_messages("proiekt_kh").await.expect("messages");
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].text.as_deref(), Some("First\n\nSecond"));
    assert!(messages[2].timestamp.is_none());
    assert!(messages[2].text.is_none());

    let rust = store
        .fetch_conversation("rust_ua")
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(rust.conversation.name, "Rust UA");
    assert_eq!(rust.conversation.joined, NaiveDate::from_ymd_opt(2022, 11, 15));
}

#[tokio::test]
async fn external_id_conflict_rejects_only_that_conversation() {
    let mut annotations = FileAnnotations::default();
    for slug in ["proiekt_kh", "book_club"] {
        annotations.insert(
            slug,
            Annotation {
                external_id: Some(42),
                ..Annotation::default()
            },
        );
    }
    let batches = prepare_batches(EXPORT, &Config::default(), &mut annotations).expect("prepare");

    let mut ingestor = two_store_ingestor().await;
    let report = ingestor.ingest(&batches).await.expect("ingest");

    assert_eq!(report.attempted, 3);
    assert_eq!(report.committed, 2);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.slug, "book_club");
    assert_eq!(failure.external_id, Some(42));
    assert_eq!(failure.store, Some("sqlite"));
    assert!(!failure.diverged);
    assert!(failure.error.contains("proiekt_kh"));

    for store in ingestor.stores() {
        assert_eq!(store.count_conversations().await.expect("count"), 2);
        assert!(
            store
                .fetch_conversation("book_club")
                .await
                .expect("fetch")
                .is_none()
        );
        assert!(
            store
                .fetch_conversation("rust_ua")
                .await
                .expect("fetch")
                .is_some()
        );
    }
}

#[tokio::test]
async fn staging_failure_in_one_store_rolls_back_all() {
    let mut ingestor = two_store_ingestor().await;
    ingestor.ensure_schema().await.expect("schema");

    // Only the second store already knows external_id 7.
    let mut squatter = Conversation::new("squatter", "Squatter");
    squatter.external_id = Some(7);
    let second = &mut ingestor.stores_mut()[1];
    second.upsert_conversation(&squatter).await.expect("seed");
    second.commit().await.expect("commit seed");

    let mut annotations = FileAnnotations::default();
    annotations.insert(
        "book_club",
        Annotation {
            external_id: Some(7),
            ..Annotation::default()
        },
    );
    let batches = prepare_batches(EXPORT, &Config::default(), &mut annotations).expect("prepare");
    let report = ingestor.ingest(&batches).await.expect("ingest");

    assert_eq!(report.committed, 2);
    assert_eq!(report.failures[0].slug, "book_club");

    let [first, second] = ingestor.stores() else {
        unreachable!("two stores configured");
    };
    assert!(
        first
            .fetch_conversation("book_club")
            .await
            .expect("fetch")
            .is_none()
    );
    assert_eq!(first.count_conversations().await.expect("count"), 2);
    assert_eq!(second.count_conversations().await.expect("count"), 3);
    assert_eq!(report.stores[0].conversations, 2);
    assert_eq!(report.stores[0].inserted, 4);
}

#[tokio::test]
async fn interrupt_stops_before_next_conversation() {
    let flag = Arc::new(AtomicBool::new(true));
    let mut ingestor = two_store_ingestor().await.with_interrupt(Arc::clone(&flag));

    let report = ingestor.ingest(&batches()).await.expect("ingest");
    assert!(report.interrupted);
    assert_eq!(report.attempted, 0);
    assert_eq!(report.committed, 0);
    for store in ingestor.stores() {
        assert_eq!(store.count_conversations().await.expect("count"), 0);
    }

    flag.store(false, std::sync::atomic::Ordering::SeqCst);
    let report = ingestor.ingest(&batches()).await.expect("ingest");
    assert!(!report.interrupted);
    assert_eq!(report.committed, 3);
}

#[tokio::test]
async fn messages_without_id_are_inserted_each_run() {
    let html = r"<table><caption>Loose</caption>
        <tr><td>n/a</td><td>01.01.2024 00:00</td><td>anonymous</td></tr>
        <tr><td>5</td><td>01.01.2024 00:01</td><td>numbered</td></tr>
    </table>";
    let batches = prepare_batches(html, &Config::default(), &mut DefaultAnnotator).expect("prepare");

    let mut ingestor = two_store_ingestor().await;
    ingestor.ingest(&batches).await.expect("first");
    let report = ingestor.ingest(&batches).await.expect("second");

    assert_eq!(report.stores[0].inserted, 1);
    assert_eq!(report.stores[0].skipped, 1);
    assert_eq!(
        ingestor.stores()[0].count_messages().await.expect("count"),
        3
    );
}

#[tokio::test]
async fn json_dump_is_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut ingestor = two_store_ingestor()
        .await
        .with_exporter(JsonExporter::new(dir.path()));
    ingestor.ingest(&batches()).await.expect("ingest");

    let content =
        std::fs::read_to_string(dir.path().join("conversations.json")).expect("conversations");
    let conversations: Vec<Conversation> = serde_json::from_str(&content).expect("parse");
    assert_eq!(conversations.len(), 3);
    assert!(dir.path().join("messages_book_club.json").exists());
}
