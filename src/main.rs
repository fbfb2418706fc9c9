use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::catalog::CardCatalog;
use crate::config::Settings;
use crate::model::{CardSeed, ScrapeJob, SetSeed};
use crate::pool::ScrapePool;
use crate::report::console_reporter;
use crate::retry::RetryPolicy;
use crate::runner::SalesRunner;
use crate::store::SqliteStore;

pub mod browser;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod pool;
pub mod report;
pub mod retry;
pub mod runner;
pub mod store;

/// tcgplayer sales history scraper.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file to load instead of the platform default location.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// SQLite database URL (overrides config).
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scrape recent sales for every card of a set that has none recorded.
    Scrape {
        /// Group id of the set, as used by the catalog.
        #[arg(long)]
        group_id: i64,
        /// Worker slots (overrides config). Keep it low; the site
        /// rate-limits hard.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Run the browser with a visible window.
        #[arg(long)]
        headed: bool,
    },
    /// Load a set and its cards into the catalog from a JSON file.
    Seed {
        /// JSON file with a `set` object and a `cards` array.
        file: PathBuf,
    },
}

/// Shape of the seed file consumed by `tcgsales seed`.
#[derive(Debug, Deserialize)]
struct SeedFile {
    set: SetSeed,
    cards: Vec<CardSeed>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    init_tracing()?;
    info!("Starting up");

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        settings.database_url = url;
    }

    let result = match cli.command {
        Command::Seed { file } => seed(&settings, &file).await,
        Command::Scrape {
            group_id,
            concurrency,
            headed,
        } => {
            if let Some(concurrency) = concurrency {
                settings.scrape.concurrency = concurrency;
            }
            if headed {
                settings.scrape.headless = false;
            }
            scrape(&settings, group_id).await
        }
    };

    info!("Shutting down");
    result
}

/// Progress lines go to stdout for the reporter; diagnostics go to a log
/// file so the two never interleave.
fn init_tracing() -> color_eyre::Result<()> {
    let log_file = std::fs::File::create("tcgsales.log")?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

async fn scrape(settings: &Settings, group_id: i64) -> color_eyre::Result<()> {
    let store = Arc::new(SqliteStore::open(&settings.database_url).await?);
    let cards = store.cards_to_scrape(group_id).await?;
    if cards.is_empty() {
        println!("Nothing to scrape: every card of set {group_id} already has sales recorded.");
        return Ok(());
    }
    info!(cards = cards.len(), group_id, "starting scrape batch");

    let (reporter, console) = console_reporter();
    let runner = SalesRunner::launch(settings.scrape.clone(), store).await?;
    let policy = RetryPolicy::new(
        settings.scrape.max_attempts,
        settings.scrape.retry_backoff(),
    );
    let pool = ScrapePool::start(settings.scrape.concurrency, runner, policy, reporter);

    let total = cards.len();
    for (index, card) in cards.into_iter().enumerate() {
        pool.enqueue(ScrapeJob::new(card, index, total)).await;
    }
    pool.idle().await;
    pool.close().await;

    // Closing the pool dropped the last sender; the console task drains
    // whatever is queued and exits.
    let _ = console.await;
    Ok(())
}

async fn seed(settings: &Settings, file: &std::path::Path) -> color_eyre::Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let seed: SeedFile = serde_json::from_str(&raw)?;

    let store = SqliteStore::open(&settings.database_url).await?;
    let set_id = store.upsert_set(&seed.set).await?;
    for card in &seed.cards {
        store.insert_card(set_id, card).await?;
    }
    println!(
        "Seeded {} cards into set {} ({})",
        seed.cards.len(),
        seed.set.name,
        seed.set.abbreviation
    );
    Ok(())
}
