//! chatvault CLI - ingest HTML chat exports into SQLite and PostgreSQL

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use chatvault_core::annotate::{Annotator, DefaultAnnotator, FileAnnotations};
use chatvault_core::export::JsonExporter;
use chatvault_core::ingest::{IngestReport, prepare_batches};
use chatvault_core::{AnyStore, ChatStore, Config, Ingestor, PostgresStore, SqliteStore};
use clap::{Parser, Subcommand};
use console::{Term, style};

mod input;
mod prompt;

#[derive(Debug, Parser)]
#[command(
    name = "chatvault",
    author,
    version,
    about = "Ingest HTML chat exports into SQLite and PostgreSQL",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract an export and write it to every configured store
    Ingest {
        /// HTML export; looked up in html_dir when not found as given
        file: Option<PathBuf>,

        /// Skip the annotation prompts
        #[arg(long)]
        no_prompt: bool,

        /// TOML file with annotations keyed by slug
        #[arg(long, conflicts_with = "no_prompt")]
        annotations: Option<PathBuf>,

        /// Also dump the extracted records as JSON into export_dir
        #[arg(long)]
        dump_json: bool,
    },

    /// Drop the messages and conversations tables
    Drop {
        /// Only drop the SQLite tables
        #[arg(long)]
        sqlite_only: bool,

        /// Only drop the PostgreSQL tables
        #[arg(long)]
        pg_only: bool,
    },

    /// Show row counts per store
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    match cli.command {
        Command::Ingest {
            file,
            no_prompt,
            annotations,
            dump_json,
        } => cmd_ingest(&config, file, no_prompt, annotations, dump_json).await,
        Command::Drop {
            sqlite_only,
            pg_only,
        } => {
            // Both flags together select both stores.
            let (sqlite, postgres) = match (sqlite_only, pg_only) {
                (true, false) => (true, false),
                (false, true) => (false, true),
                _ => (true, true),
            };
            cmd_drop(&config, sqlite, postgres).await
        }
        Command::Stats => cmd_stats(&config).await,
    }
}

/// Open the selected stores. PostgreSQL is skipped when no URL is configured.
async fn open_stores(config: &Config, sqlite: bool, postgres: bool) -> Result<Vec<AnyStore>> {
    let mut stores = Vec::new();
    if sqlite {
        let store = SqliteStore::open(&config.sqlite_path)
            .await
            .with_context(|| format!("Opening {}", config.sqlite_path.display()))?;
        stores.push(AnyStore::from(store));
    }
    if postgres {
        match config.database_url.as_deref() {
            Some(url) => {
                let store = PostgresStore::connect(url)
                    .await
                    .context("Connecting to PostgreSQL")?;
                stores.push(AnyStore::from(store));
            }
            None => tracing::warn!("No database_url configured; skipping PostgreSQL"),
        }
    }
    Ok(stores)
}

async fn cmd_ingest(
    config: &Config,
    file: Option<PathBuf>,
    no_prompt: bool,
    annotations: Option<PathBuf>,
    dump_json: bool,
) -> Result<()> {
    let term = Term::stdout();
    let path = input::locate(file.as_deref(), &config.html_dir, &term)?;
    let html = std::fs::read_to_string(&path)
        .with_context(|| format!("Reading {}", path.display()))?;
    tracing::info!("Ingesting {}", path.display());

    let mut annotator: Box<dyn Annotator> = match annotations {
        Some(annotations) => Box::new(FileAnnotations::load(&annotations)?),
        None if no_prompt => Box::new(DefaultAnnotator),
        None if !term.is_term() => {
            tracing::warn!("Not a terminal; using default annotations");
            Box::new(DefaultAnnotator)
        }
        None => Box::new(prompt::PromptAnnotator::new(term.clone())),
    };
    let batches = prepare_batches(&html, config, annotator.as_mut())?;

    let stores = open_stores(config, true, true).await?;
    let interrupt = Arc::new(AtomicBool::new(false));
    let mut ingestor = Ingestor::new(stores).with_interrupt(Arc::clone(&interrupt));
    if dump_json {
        ingestor = ingestor.with_exporter(JsonExporter::new(&config.export_dir));
    }

    // Dropping the ingest future leaves the open transactions to close().
    let outcome = tokio::select! {
        report = ingestor.ingest(&batches) => Some(report),
        () = watch_interrupts(Arc::clone(&interrupt), tokio::signal::ctrl_c) => None,
    };
    ingestor.close().await;
    let Some(report) = outcome else {
        bail!("Aborted by a second interrupt; the conversation in progress was rolled back");
    };
    let report = report?;

    print_summary(&report, batches.len());
    if dump_json {
        println!("JSON dump written to {}", config.export_dir.display());
    }

    if !report.failures.is_empty() {
        bail!("{} conversation(s) failed to ingest", report.failures.len());
    }
    Ok(())
}

/// Resolves on the second signal. The first one only raises `flag`, which
/// stops the ingest before its next conversation. A signal source that fails
/// never resolves.
async fn watch_interrupts<F, Fut>(flag: Arc<AtomicBool>, mut next_signal: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
        return std::future::pending().await;
    }
    tracing::warn!("Interrupt received; finishing the current conversation (Ctrl-C again aborts)");
    flag.store(true, Ordering::SeqCst);

    if let Err(e) = next_signal().await {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
        return std::future::pending().await;
    }
    tracing::warn!("Second interrupt received; aborting");
}

fn print_summary(report: &IngestReport, total: usize) {
    println!();
    println!("{}", style("Ingest summary").bold());
    println!("--------------");
    println!(
        "Conversations: {}/{} committed ({} in document)",
        report.committed, report.attempted, total
    );
    for stats in &report.stores {
        println!(
            "  {:<9} {} inserted, {} duplicates skipped",
            stats.backend,
            style(stats.inserted).green(),
            style(stats.skipped).dim()
        );
    }

    if report.interrupted {
        println!(
            "{}",
            style("Interrupted: remaining conversations were not processed").yellow()
        );
    }

    if report.has_divergence() {
        println!(
            "{}",
            style("Stores diverge: some conversations committed in only part of the stores. Re-run to reconcile.")
                .yellow()
                .bold()
        );
    }

    for failure in &report.failures {
        let external = failure
            .external_id
            .map(|id| format!(" ext:{id}"))
            .unwrap_or_default();
        let store = failure
            .store
            .map(|s| format!(" [{s}]"))
            .unwrap_or_default();
        let ordinal = failure
            .message_ordinal
            .map(|n| format!(" message #{n}"))
            .unwrap_or_default();
        println!(
            "  {} {}{external}{store}{ordinal}: {}",
            style("FAILED").red().bold(),
            failure.slug,
            failure.error
        );
        if failure.diverged {
            println!("    {}", style("committed in an earlier store").yellow());
        }
    }
}

async fn cmd_drop(config: &Config, sqlite: bool, postgres: bool) -> Result<()> {
    let stores = open_stores(config, sqlite, postgres).await?;
    if stores.is_empty() {
        println!("No stores selected.");
        return Ok(());
    }

    for mut store in stores {
        store.drop_schema().await?;
        println!("Dropped tables in {}", store.backend());
        store.close().await;
    }
    Ok(())
}

async fn cmd_stats(config: &Config) -> Result<()> {
    let stores = open_stores(config, true, true).await?;

    println!("Store Statistics");
    println!("----------------");
    for mut store in stores {
        store.ensure_schema().await?;
        let conversations = store.count_conversations().await?;
        let messages = store.count_messages().await?;
        println!(
            "{:<9} conversations: {conversations:>6}  messages: {messages:>8}",
            store.backend()
        );
        store.close().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_interrupt_ends_the_watch() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut signals = 0;
        watch_interrupts(Arc::clone(&flag), || {
            signals += 1;
            std::future::ready(Ok(()))
        })
        .await;
        assert_eq!(signals, 2);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn first_interrupt_only_raises_the_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut fired = false;
        let watch = watch_interrupts(Arc::clone(&flag), move || {
            let first = !fired;
            fired = true;
            async move {
                if first {
                    Ok(())
                } else {
                    std::future::pending().await
                }
            }
        });

        let outcome = tokio::time::timeout(Duration::from_millis(50), watch).await;
        assert!(outcome.is_err());
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_listener_never_aborts() {
        let flag = Arc::new(AtomicBool::new(false));
        let watch = watch_interrupts(Arc::clone(&flag), || {
            std::future::ready(Err(std::io::Error::other("no signal handler")))
        });

        let outcome = tokio::time::timeout(Duration::from_millis(50), watch).await;
        assert!(outcome.is_err());
        assert!(!flag.load(Ordering::SeqCst));
    }
}
