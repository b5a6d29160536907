//! # Daily Digest CLI (`digest`)
//!
//! ## Usage
//!
//! ```bash
//! digest --config ./config/digest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `digest init` | Create the SQLite database and run schema migrations |
//! | `digest run` | Run one ingestion for today |
//! | `digest weekly` | Summarize the week's engagement |
//! | `digest serve` | Start the HTTP API |
//! | `digest search "<query>"` | Search stored items |
//! | `digest show [DATE]` | Print a day's digest |
//! | `digest dates` | List days with a digest |
//! | `digest runs` | List recent ingestion runs |
//! | `digest sources <action>` | Manage sources |
//! | `digest embed pending` | Backfill missing embeddings |
//! | `digest token <user>` | Mint a user session token |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `daily_digest=info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use daily_digest::auth::issue_token;
use daily_digest::config::{self, Config};
use daily_digest::embedding::{create_provider, EmbeddingProvider};
use daily_digest::pipeline::Pipeline;
use daily_digest::search::Retriever;
use daily_digest::store::{DigestStore, SqliteStore};
use daily_digest::{embed_cmd, migrate, server, show, sources, weekly};

/// Daily Digest: fetch, curate, embed and search a daily news digest.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "digest",
    about = "Daily Digest: a curated daily news digest with semantic search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/digest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run one ingestion: fetch, sample, curate, embed, store.
    Run,

    /// Summarize the last week's favorited and read items.
    Weekly,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Search stored digest items.
    Search {
        query: String,

        /// Use semantic search (falls back to keyword matching).
        #[arg(long)]
        semantic: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the digest for a date (YYYY-MM-DD), newest by default.
    Show { date: Option<String> },

    /// List dates that have a digest.
    Dates,

    /// List recent ingestion runs.
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Manage sources.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Mint a session token for a user.
    ///
    /// Requires `SESSION_SECRET` (or `[server].session_secret`).
    Token {
        user: String,

        #[arg(long, default_value_t = 24 * 30)]
        ttl_hours: u64,
    },
}

#[derive(Subcommand)]
enum SourcesAction {
    /// List all sources.
    List,
    /// Add a source. Category `reddit` selects the social fetcher.
    Add {
        url: String,
        name: String,
        category: String,
    },
    /// Remove a source by id or URL.
    Remove { source: String },
    /// Include a source in ingestion runs.
    Enable { source: String },
    /// Exclude a source from ingestion runs.
    Disable { source: String },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed items that were stored without a vector.
    Pending {
        /// Maximum number of items to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("daily_digest=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(cfg).await?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run => {
            let store = open_store(&cfg).await?;
            let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&cfg.embedding)?);
            let pipeline = Pipeline::from_config(&cfg, store.clone(), embedder)?;

            let today = chrono::Utc::now().date_naive();
            let result = pipeline.run(today).await;
            store.close().await;

            let summary = result.context("ingestion run failed")?;
            println!("run {}", summary.run_date);
            println!("  fetched: {}", summary.items_fetched);
            println!("  stored: {}", summary.items_stored);
            println!("  embedded: {}", summary.items_embedded);
        }
        Commands::Weekly => {
            let store = open_store(&cfg).await?;
            let today = chrono::Utc::now().date_naive();
            let result = weekly::run_weekly(&*store, today).await;
            store.close().await;

            let digest = result.context("weekly digest failed")?;
            println!("week ending {today}: {} articles", digest.articles_included);
            for (category, count) in &digest.categories {
                println!("  {category}: {count}");
            }
            println!("{}", digest.insight);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Search {
            query,
            semantic,
            limit,
        } => {
            let store = open_store(&cfg).await?;
            let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&cfg.embedding)?);
            let retriever = Retriever::from_config(&cfg, store.clone(), embedder);
            let limit = limit.unwrap_or(cfg.retrieval.search_limit);
            show::run_search(&retriever, &query, semantic, limit).await?;
            store.close().await;
        }
        Commands::Show { date } => {
            let date = date
                .map(|d| {
                    NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                        .with_context(|| format!("invalid date '{d}', expected YYYY-MM-DD"))
                })
                .transpose()?;
            let store = open_store(&cfg).await?;
            show::run_show(&*store, date).await?;
            store.close().await;
        }
        Commands::Dates => {
            let store = open_store(&cfg).await?;
            show::run_dates(&*store).await?;
            store.close().await;
        }
        Commands::Runs { limit } => {
            let store = open_store(&cfg).await?;
            show::run_runs(&*store, limit).await?;
            store.close().await;
        }
        Commands::Sources { action } => {
            let store = open_store(&cfg).await?;
            let db: &dyn DigestStore = &*store;
            match action {
                SourcesAction::List => sources::list_sources(db).await?,
                SourcesAction::Add {
                    url,
                    name,
                    category,
                } => {
                    sources::add_source(db, &url, &name, &category).await?;
                }
                SourcesAction::Remove { source } => sources::remove_source(db, &source).await?,
                SourcesAction::Enable { source } => sources::set_active(db, &source, true).await?,
                SourcesAction::Disable { source } => {
                    sources::set_active(db, &source, false).await?
                }
            }
            store.close().await;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
        },
        Commands::Token { user, ttl_hours } => {
            let Some(secret) = cfg.session_secret() else {
                bail!("SESSION_SECRET is not set");
            };
            let token = issue_token(
                secret,
                &user,
                Duration::from_secs(ttl_hours * 3600),
                chrono::Utc::now().timestamp(),
            )?;
            println!("{}", token);
        }
    }

    Ok(())
}
