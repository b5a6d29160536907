//! One ingestion run, end to end.
//!
//! ```text
//! sources ──▶ aggregate ──▶ sample ──▶ curate (filter) ──┐
//! official ──────────────────────────▶ curate (summary) ─┴─▶ embed ──▶ store ──▶ run record
//! ```
//!
//! Every exit path writes exactly one [`RunRecord`]. Fetch, curation and
//! embedding failures degrade the output but never fail the run; a store
//! write failure or the run ceiling does, and is recorded as `failed`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::aggregate::Aggregator;
use crate::config::Config;
use crate::curate::{create_completion_provider, Curator};
use crate::embedding::{attach_embeddings, EmbeddingProvider};
use crate::error::DigestError;
use crate::fetch::{FeedFetcher, OfficialFetcher, SocialFetcher};
use crate::models::{RunRecord, RunStatus};
use crate::notify::{LogNotifier, Notifier};
use crate::sampler::Sampler;
use crate::store::DigestStore;

/// Message stored on a successful run that produced nothing.
pub const NO_ITEMS_MESSAGE: &str = "No relevant items found";

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_date: NaiveDate,
    pub items_fetched: usize,
    pub items_stored: usize,
    pub items_embedded: usize,
}

pub struct Pipeline {
    pub store: Arc<dyn DigestStore>,
    pub aggregator: Aggregator,
    pub official: OfficialFetcher,
    pub sampler: Sampler,
    pub curator: Curator,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub max_embed_chars: usize,
    pub ceiling: Duration,
}

impl Pipeline {
    /// Wires the production fetchers, curator and notifier from config.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn DigestStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let feeds = Arc::new(FeedFetcher::new(&config.fetch)?);
        let social = Arc::new(SocialFetcher::new(&config.fetch)?);
        let provider = create_completion_provider(&config.curation)?;

        Ok(Self {
            store,
            aggregator: Aggregator::new(feeds, social, config.fetch.timeout()),
            official: OfficialFetcher::new(&config.fetch, config.official.clone())?,
            sampler: Sampler::new(config.sampling.sample_size, config.sampling.strategy),
            curator: Curator::new(Arc::from(provider), config.curation.clone()),
            embedder,
            notifier: Arc::new(LogNotifier),
            max_embed_chars: config.embedding.max_chars,
            ceiling: config.ingest.ceiling(),
        })
    }

    /// Runs one ingestion for `date`.
    ///
    /// On error a `failed` run record has already been written (or its
    /// write failure logged) by the time this returns.
    pub async fn run(&self, date: NaiveDate) -> Result<RunSummary, DigestError> {
        let started = Instant::now();
        let fetched = AtomicUsize::new(0);

        let outcome = match tokio::time::timeout(self.ceiling, self.execute(date, &fetched)).await
        {
            Ok(result) => result,
            Err(_) => Err(DigestError::Timeout(self.ceiling)),
        };

        match outcome {
            Ok(summary) => {
                info!(
                    fetched = summary.items_fetched,
                    stored = summary.items_stored,
                    embedded = summary.items_embedded,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "ingestion run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(error = %e, "ingestion run failed");
                let record = RunRecord {
                    run_date: date,
                    status: RunStatus::Failed,
                    items_fetched: fetched.load(Ordering::SeqCst) as i64,
                    items_stored: 0,
                    error_message: Some(e.to_string()),
                };
                if let Err(write_err) = self.store.insert_run(&record).await {
                    error!(error = %write_err, "could not record failed run");
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        date: NaiveDate,
        fetched: &AtomicUsize,
    ) -> Result<RunSummary, DigestError> {
        let sources = match self.store.active_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "could not load sources, continuing with none");
                Vec::new()
            }
        };
        info!(sources = sources.len(), %date, "starting ingestion run");

        let articles = self.aggregator.collect(&sources).await;
        let sampled = self.sampler.sample(articles, &mut rand::rng());

        let (general, official_articles) = tokio::join!(
            self.curator.filter_and_summarize(&sampled, date),
            self.official.fetch_all()
        );

        let items_fetched = sampled.len() + official_articles.len();
        fetched.store(items_fetched, Ordering::SeqCst);

        let mut items = self
            .curator
            .summarize_official(&official_articles, date)
            .await;
        items.extend(general.into_items());

        if items.is_empty() {
            self.record_success(date, items_fetched, 0, Some(NO_ITEMS_MESSAGE))
                .await?;
            return Ok(RunSummary {
                run_date: date,
                items_fetched,
                items_stored: 0,
                items_embedded: 0,
            });
        }

        let items_embedded =
            attach_embeddings(self.embedder.as_ref(), &mut items, self.max_embed_chars).await;

        self.store
            .insert_items(&items)
            .await
            .map_err(DigestError::persistence)?;

        if let Err(e) = self.notifier.digest_ready(date, items.len()).await {
            warn!(error = %e, "notification failed");
        }

        self.record_success(date, items_fetched, items.len(), None)
            .await?;

        Ok(RunSummary {
            run_date: date,
            items_fetched,
            items_stored: items.len(),
            items_embedded,
        })
    }

    async fn record_success(
        &self,
        date: NaiveDate,
        fetched: usize,
        stored: usize,
        message: Option<&str>,
    ) -> Result<(), DigestError> {
        let record = RunRecord {
            run_date: date,
            status: RunStatus::Success,
            items_fetched: fetched as i64,
            items_stored: stored as i64,
            error_message: message.map(str::to_string),
        };
        self.store
            .insert_run(&record)
            .await
            .map_err(DigestError::persistence)
    }
}
