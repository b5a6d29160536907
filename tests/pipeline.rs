//! End-to-end ingestion runs against the in-memory store with scripted
//! fetchers and providers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use daily_digest::aggregate::Aggregator;
use daily_digest::config::{
    CurationConfig, FetchConfig, OfficialKind, OfficialSourceConfig,
};
use daily_digest::curate::{CompletionProvider, Curator, FALLBACK_TLDR};
use daily_digest::embedding::{EmbeddingProvider, IndexedEmbedding};
use daily_digest::error::DigestError;
use daily_digest::fetch::{OfficialFetcher, SourceFetcher};
use daily_digest::models::{
    Article, Category, CuratedItem, DigestItem, InteractionEvent, NewSource, RunRecord,
    RunStatus, Source, SourceUpdate,
};
use daily_digest::notify::Notifier;
use daily_digest::pipeline::{Pipeline, NO_ITEMS_MESSAGE};
use daily_digest::sampler::{Sampler, SamplingStrategy};
use daily_digest::store::{DigestStore, Engagement, InMemoryStore};

// ============ Fakes ============

/// `count` articles per source, named after the source; names starting
/// with "bad" fail and names starting with "slow" hang.
struct ScriptedFetcher {
    count: usize,
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>, DigestError> {
        if source.name.starts_with("bad") {
            return Err(DigestError::source_fetch(&source.name, "HTTP 502"));
        }
        if source.name.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok((0..self.count)
            .map(|i| Article {
                title: format!("{} story {}", source.name, i),
                summary: format!("Body of story {i}"),
                url: format!("https://{}.example.com/{}", source.name, i),
                source: source.name.clone(),
                category: Category::parse(&source.category),
                published_at: None,
            })
            .collect())
    }
}

/// Replies per mode and records every prompt.
struct ScriptedCompletion {
    general: Option<String>,
    official: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    fn new(general: Option<&str>, official: Option<&str>) -> Self {
        Self {
            general: general.map(str::to_string),
            official: official.map(str::to_string),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = if prompt.contains("Filter these articles") {
            &self.general
        } else {
            &self.official
        };
        match reply {
            Some(r) => Ok(r.clone()),
            None => bail!("classifier unavailable"),
        }
    }
}

struct FixedEmbedder {
    fail: bool,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>> {
        if self.fail {
            bail!("embedding service returned 500");
        }
        Ok((0..texts.len())
            .rev()
            .map(|index| IndexedEmbedding {
                index,
                embedding: vec![index as f32, 1.0, 0.0],
            })
            .collect())
    }
}

struct CountingNotifier(Mutex<Vec<(NaiveDate, usize)>>);

#[async_trait]
impl Notifier for CountingNotifier {
    async fn digest_ready(&self, date: NaiveDate, item_count: usize) -> Result<()> {
        self.0.lock().unwrap().push((date, item_count));
        Ok(())
    }
}

/// Delegates to an in-memory store but refuses item writes.
struct ReadOnlyItems(InMemoryStore);

#[async_trait]
impl DigestStore for ReadOnlyItems {
    async fn insert_items(&self, _items: &[CuratedItem]) -> Result<Vec<String>> {
        bail!("database is locked")
    }
    async fn get_item(&self, id: &str) -> Result<Option<DigestItem>> {
        self.0.get_item(id).await
    }
    async fn items_for_date(&self, date: NaiveDate) -> Result<Vec<DigestItem>> {
        self.0.items_for_date(date).await
    }
    async fn distinct_dates(&self) -> Result<Vec<NaiveDate>> {
        self.0.distinct_dates().await
    }
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<DigestItem>> {
        self.0.keyword_search(query, limit).await
    }
    async fn recent_items(&self, limit: usize) -> Result<Vec<DigestItem>> {
        self.0.recent_items(limit).await
    }
    async fn embedded_items(&self) -> Result<Vec<DigestItem>> {
        self.0.embedded_items().await
    }
    async fn items_missing_embeddings(&self, limit: Option<usize>) -> Result<Vec<DigestItem>> {
        self.0.items_missing_embeddings(limit).await
    }
    async fn set_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        self.0.set_embedding(id, embedding).await
    }
    async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        self.0.insert_run(run).await
    }
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.0.recent_runs(limit).await
    }
    async fn list_sources(&self) -> Result<Vec<Source>> {
        self.0.list_sources().await
    }
    async fn active_sources(&self) -> Result<Vec<Source>> {
        self.0.active_sources().await
    }
    async fn create_source(&self, source: &NewSource) -> Result<Source> {
        self.0.create_source(source).await
    }
    async fn update_source(&self, id: &str, update: &SourceUpdate) -> Result<bool> {
        self.0.update_source(id, update).await
    }
    async fn delete_source(&self, id: &str) -> Result<bool> {
        self.0.delete_source(id).await
    }
    async fn record_interaction(&self, event: &InteractionEvent) -> Result<()> {
        self.0.record_interaction(event).await
    }
    async fn interactions_for_user(&self, user_id: &str) -> Result<Vec<InteractionEvent>> {
        self.0.interactions_for_user(user_id).await
    }
    async fn preference_vector(&self, user_id: &str) -> Result<Option<Vec<f32>>> {
        self.0.preference_vector(user_id).await
    }
    async fn save_preference_vector(&self, user_id: &str, vector: &[f32]) -> Result<()> {
        self.0.save_preference_vector(user_id, vector).await
    }
    async fn toggle_favorite(&self, user_id: &str, item_id: &str) -> Result<bool> {
        self.0.toggle_favorite(user_id, item_id).await
    }
    async fn favorites(&self, user_id: &str) -> Result<Vec<DigestItem>> {
        self.0.favorites(user_id).await
    }
    async fn mark_read(&self, user_id: &str, item_id: &str) -> Result<()> {
        self.0.mark_read(user_id, item_id).await
    }
    async fn engaged_items(
        &self,
        engagement: Engagement,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<DigestItem>> {
        self.0.engaged_items(engagement, from, to, limit).await
    }
}

// ============ Helpers ============

const GENERAL_REPLY: &str = r#"Here are today's picks:
```json
[
  {"title": "Cargo gets faster", "summary": "Builds are quicker.", "tldr": "Cargo builds are now much faster for large workspaces.",
   "sentiment": "technical", "category": "dev_tools",
   "source_url": "https://rust.example.com/0", "source_name": "rust"},
  {"title": "Race recap", "summary": "A close finish.", "tldr": "The championship leader won by a tenth.",
   "sentiment": "drama", "category": "f1",
   "source_url": "https://f1.example.com/1", "source_name": "f1"}
]
```"#;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 14).unwrap()
}

async fn seed_sources(store: &dyn DigestStore, names: &[(&str, &str)]) {
    for (name, category) in names {
        store
            .create_source(&NewSource {
                url: format!("https://{name}.example.com/feed"),
                name: name.to_string(),
                category: category.to_string(),
            })
            .await
            .unwrap();
    }
}

struct Harness {
    store: Arc<dyn DigestStore>,
    completion: Arc<ScriptedCompletion>,
    embedder: Arc<FixedEmbedder>,
    notifier: Arc<CountingNotifier>,
    official: Vec<OfficialSourceConfig>,
    articles_per_source: usize,
    per_source_timeout: Duration,
    ceiling: Duration,
}

impl Harness {
    fn new(store: Arc<dyn DigestStore>) -> Self {
        Self {
            store,
            completion: Arc::new(ScriptedCompletion::new(Some(GENERAL_REPLY), None)),
            embedder: Arc::new(FixedEmbedder { fail: false }),
            notifier: Arc::new(CountingNotifier(Mutex::new(Vec::new()))),
            official: Vec::new(),
            articles_per_source: 3,
            per_source_timeout: Duration::from_secs(20),
            ceiling: Duration::from_secs(300),
        }
    }

    fn build(&self) -> Pipeline {
        let fetcher = Arc::new(ScriptedFetcher {
            count: self.articles_per_source,
        });
        Pipeline {
            store: self.store.clone(),
            aggregator: Aggregator::new(fetcher.clone(), fetcher, self.per_source_timeout),
            official: OfficialFetcher::new(&FetchConfig::default(), self.official.clone())
                .unwrap(),
            sampler: Sampler::new(15, SamplingStrategy::First),
            curator: Curator::new(self.completion.clone(), CurationConfig::default()),
            embedder: self.embedder.clone(),
            notifier: self.notifier.clone(),
            max_embed_chars: 8000,
            ceiling: self.ceiling,
        }
    }
}

// ============ Scenarios ============

#[tokio::test]
async fn test_happy_path_stores_embedded_items_and_records_success() {
    let store = Arc::new(InMemoryStore::new());
    seed_sources(store.as_ref(), &[("rust", "dev_tools"), ("f1", "f1")]).await;
    let harness = Harness::new(store.clone());

    let summary = harness.build().run(today()).await.unwrap();
    assert_eq!(summary.items_fetched, 6);
    assert_eq!(summary.items_stored, 2);
    assert_eq!(summary.items_embedded, 2);

    let items = store.items_for_date(today()).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.item.embedding.is_some()));
    assert!(items.iter().all(|i| i.item.category != Category::OfficialNews));

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Success);
    assert_eq!(runs[0].items_stored, 2);
    assert_eq!(*harness.notifier.0.lock().unwrap(), vec![(today(), 2)]);
}

#[tokio::test]
async fn test_one_failing_source_still_yields_the_others() {
    let store = Arc::new(InMemoryStore::new());
    seed_sources(
        store.as_ref(),
        &[
            ("a", "misc"),
            ("b", "misc"),
            ("bad", "misc"),
            ("c", "dev_tools"),
            ("d", "dev_tools"),
            ("e", "ml_news"),
        ],
    )
    .await;
    let mut harness = Harness::new(store.clone());
    harness.articles_per_source = 2;

    let summary = harness.build().run(today()).await.unwrap();
    assert_eq!(summary.items_fetched, 10);
}

#[tokio::test]
async fn test_classifier_failure_is_a_successful_empty_run() {
    let store = Arc::new(InMemoryStore::new());
    seed_sources(store.as_ref(), &[("rust", "dev_tools")]).await;
    let mut harness = Harness::new(store.clone());
    harness.completion = Arc::new(ScriptedCompletion::new(None, None));

    let summary = harness.build().run(today()).await.unwrap();
    assert_eq!(summary.items_stored, 0);

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Success);
    assert_eq!(runs[0].items_stored, 0);
    assert_eq!(runs[0].error_message.as_deref(), Some(NO_ITEMS_MESSAGE));
    assert!(harness.notifier.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_embedding_failure_still_persists_items() {
    let store = Arc::new(InMemoryStore::new());
    seed_sources(store.as_ref(), &[("rust", "dev_tools"), ("f1", "f1")]).await;
    let mut harness = Harness::new(store.clone());
    harness.embedder = Arc::new(FixedEmbedder { fail: true });

    let summary = harness.build().run(today()).await.unwrap();
    assert_eq!(summary.items_stored, 2);
    assert_eq!(summary.items_embedded, 0);

    let items = store.items_for_date(today()).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.item.embedding.is_none()));
    assert_eq!(store.runs()[0].status, RunStatus::Success);
}

#[tokio::test]
async fn test_store_write_failure_records_failed_run() {
    let inner = InMemoryStore::new();
    seed_sources(&inner, &[("rust", "dev_tools")]).await;
    let store = Arc::new(ReadOnlyItems(inner));
    let harness = Harness::new(store.clone());

    let err = harness.build().run(today()).await.unwrap_err();
    assert!(matches!(err, DigestError::Persistence(_)));

    let runs = store.0.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].items_fetched, 3);
    assert_eq!(runs[0].items_stored, 0);
    assert!(runs[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("database is locked"));
}

#[tokio::test]
async fn test_sampler_caps_what_reaches_the_classifier() {
    let store = Arc::new(InMemoryStore::new());
    seed_sources(store.as_ref(), &[("big", "dev_tools"), ("small", "f1")]).await;
    let mut harness = Harness::new(store.clone());
    harness.articles_per_source = 40;

    let summary = harness.build().run(today()).await.unwrap();
    assert_eq!(summary.items_fetched, 30);

    let prompts = harness.completion.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].matches(r#""url":""#).count(), 30);
}

#[tokio::test]
async fn test_official_items_fall_back_when_classifier_fails() {
    let server = MockServer::start().await;
    let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Vendor</title>
  <item><title>Model release</title><link>https://vendor.example.com/release</link>
    <description>A new model is available today with better reasoning.</description></item>
  <item><title>Pricing update</title><link>https://vendor.example.com/pricing</link>
    <description>Prices changed.</description></item>
</channel></rss>"#;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryStore::new());
    let mut harness = Harness::new(store.clone());
    harness.completion = Arc::new(ScriptedCompletion::new(None, None));
    harness.official = vec![OfficialSourceConfig {
        name: "Vendor News".into(),
        url: format!("{}/rss.xml", server.uri()),
        kind: OfficialKind::Feed,
        path_prefix: None,
        fallback_url: None,
        limit: 5,
    }];

    let summary = harness.build().run(today()).await.unwrap();
    assert_eq!(summary.items_fetched, 2);
    assert_eq!(summary.items_stored, 2);

    let items = store.items_for_date(today()).await.unwrap();
    assert!(items.iter().all(|i| i.item.category == Category::OfficialNews));
    assert!(items.iter().all(|i| i.item.tldr == FALLBACK_TLDR));
    assert!(items.iter().all(|i| i.item.summary.ends_with("...")));
    assert!(items.iter().all(|i| i.item.source_name == "Vendor News"));
}

#[tokio::test(start_paused = true)]
async fn test_hung_source_is_cut_off_by_its_own_timeout() {
    let store = Arc::new(InMemoryStore::new());
    seed_sources(store.as_ref(), &[("slow", "misc"), ("rust", "dev_tools")]).await;
    let harness = Harness::new(store.clone());

    let summary = harness.build().run(today()).await.unwrap();
    assert_eq!(summary.items_fetched, 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_ceiling_records_failed_run() {
    let store = Arc::new(InMemoryStore::new());
    seed_sources(store.as_ref(), &[("slow", "misc")]).await;
    let mut harness = Harness::new(store.clone());
    harness.per_source_timeout = Duration::from_secs(3600 * 2);
    harness.ceiling = Duration::from_secs(300);

    let started = Utc::now();
    let err = harness.build().run(today()).await.unwrap_err();
    assert!(matches!(err, DigestError::Timeout(_)));

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].error_message.as_deref().unwrap().contains("ceiling"));
    assert!(Utc::now() - started < chrono::Duration::seconds(60));
}
