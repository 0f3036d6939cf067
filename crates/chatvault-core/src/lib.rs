//! chatvault-core: chat export extraction and dual-store persistence
//!
//! This crate turns an HTML chat export (one captioned table per
//! conversation) into normalized conversation and message records, and writes
//! them idempotently into SQLite and PostgreSQL.

pub mod annotate;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod paths;
pub mod schema;
pub mod slug;
pub mod store;
pub mod temporal;

pub use config::Config;
pub use error::Error;
pub use error::Result;
pub use ingest::{IngestReport, Ingestor};
pub use store::{AnyStore, ChatStore, PostgresStore, SqliteStore};

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "chatvault";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "CHATVAULT".to_string()
}
