//! Keyword and semantic retrieval over stored digest items.
//!
//! Semantic search embeds the query, scores every embedded item by cosine
//! similarity and keeps those strictly above the configured threshold.
//! Whenever that path cannot produce a meaningful answer (query embedding
//! fails, the scan errors, or nothing stored carries a vector) the engine
//! answers with a keyword match instead, newest first. Retrieval never
//! surfaces an error to the caller.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::error::DigestError;
use crate::models::{DigestItem, ScoredItem};
use crate::store::DigestStore;

/// Which path produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Semantic,
    Keyword,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub mode: SearchMode,
    pub hits: Vec<ScoredItem>,
}

impl SearchOutcome {
    fn empty(mode: SearchMode) -> Self {
        Self {
            mode,
            hits: Vec::new(),
        }
    }
}

pub struct Retriever {
    store: Arc<dyn DigestStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f64,
    max_chars: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn DigestStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        threshold: f64,
        max_chars: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            threshold,
            max_chars,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn DigestStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(
            store,
            embedder,
            config.retrieval.similarity_threshold,
            config.embedding.max_chars,
        )
    }

    /// Case-insensitive substring search, newest date first.
    pub async fn keyword(&self, query: &str, limit: usize) -> anyhow::Result<Vec<DigestItem>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        self.store.keyword_search(query, limit).await
    }

    /// Semantic search with keyword fallback.
    pub async fn semantic(&self, query: &str, limit: usize) -> SearchOutcome {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return SearchOutcome::empty(SearchMode::Semantic);
        }

        match self.try_semantic(query, limit).await {
            Ok(Some(hits)) => SearchOutcome {
                mode: SearchMode::Semantic,
                hits,
            },
            Ok(None) => {
                debug!("no embedded items stored, using keyword search");
                self.keyword_fallback(query, limit).await
            }
            Err(e) => {
                warn!(error = %e, "semantic search failed, using keyword search");
                self.keyword_fallback(query, limit).await
            }
        }
    }

    /// `Ok(None)` means there was nothing to scan.
    async fn try_semantic(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Option<Vec<ScoredItem>>, DigestError> {
        let query_vec = embed_query(self.embedder.as_ref(), query, self.max_chars).await?;

        let candidates = self
            .store
            .embedded_items()
            .await
            .map_err(|e| DigestError::Retrieval(format!("{e:#}")))?;
        if candidates.is_empty() {
            return Ok(None);
        }

        Ok(Some(rank_by_similarity(
            &query_vec,
            candidates,
            self.threshold,
            limit,
        )))
    }

    async fn keyword_fallback(&self, query: &str, limit: usize) -> SearchOutcome {
        match self.store.keyword_search(query, limit).await {
            Ok(items) => SearchOutcome {
                mode: SearchMode::Keyword,
                hits: items.into_iter().map(ScoredItem::unscored).collect(),
            },
            Err(e) => {
                warn!(error = %e, "keyword fallback failed");
                SearchOutcome::empty(SearchMode::Keyword)
            }
        }
    }
}

/// Scores candidates against `query_vec`, keeps those strictly above
/// `threshold`, best first, at most `limit`.
///
/// Candidates without an embedding or with an undefined similarity are
/// omitted. Equal scores keep candidate order.
pub fn rank_by_similarity(
    query_vec: &[f32],
    candidates: Vec<DigestItem>,
    threshold: f64,
    limit: usize,
) -> Vec<ScoredItem> {
    let mut scored: Vec<ScoredItem> = candidates
        .into_iter()
        .filter_map(|item| {
            let similarity = item
                .item
                .embedding
                .as_deref()
                .and_then(|v| cosine_similarity(query_vec, v))? as f64;
            (similarity > threshold).then(|| ScoredItem {
                item,
                similarity: Some(similarity),
                combined_score: None,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Category, CuratedItem, InteractionEvent, NewSource, RunRecord, Sentiment, Source,
        SourceUpdate,
    };
    use crate::store::{Engagement, InMemoryStore};
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    use crate::embedding::IndexedEmbedding;

    /// Maps "rust" to the x axis and "python" to the y axis.
    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<IndexedEmbedding>> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(index, t)| {
                    let t = t.to_lowercase();
                    let embedding = if t.contains("rust") {
                        vec![1.0, 0.0]
                    } else if t.contains("python") {
                        vec![0.0, 1.0]
                    } else {
                        vec![0.7, 0.7]
                    };
                    IndexedEmbedding { index, embedding }
                })
                .collect())
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl EmbeddingProvider for BrokenProvider {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<IndexedEmbedding>> {
            anyhow::bail!("provider returned 503")
        }
    }

    /// Serves everything from an in-memory store except the vector scan.
    struct ScanFails(InMemoryStore);

    #[async_trait]
    impl DigestStore for ScanFails {
        async fn insert_items(&self, items: &[CuratedItem]) -> anyhow::Result<Vec<String>> {
            self.0.insert_items(items).await
        }
        async fn get_item(&self, id: &str) -> anyhow::Result<Option<DigestItem>> {
            self.0.get_item(id).await
        }
        async fn items_for_date(&self, date: NaiveDate) -> anyhow::Result<Vec<DigestItem>> {
            self.0.items_for_date(date).await
        }
        async fn distinct_dates(&self) -> anyhow::Result<Vec<NaiveDate>> {
            self.0.distinct_dates().await
        }
        async fn keyword_search(
            &self,
            query: &str,
            limit: usize,
        ) -> anyhow::Result<Vec<DigestItem>> {
            self.0.keyword_search(query, limit).await
        }
        async fn recent_items(&self, limit: usize) -> anyhow::Result<Vec<DigestItem>> {
            self.0.recent_items(limit).await
        }
        async fn embedded_items(&self) -> anyhow::Result<Vec<DigestItem>> {
            anyhow::bail!("disk I/O error")
        }
        async fn items_missing_embeddings(
            &self,
            limit: Option<usize>,
        ) -> anyhow::Result<Vec<DigestItem>> {
            self.0.items_missing_embeddings(limit).await
        }
        async fn set_embedding(&self, id: &str, embedding: &[f32]) -> anyhow::Result<()> {
            self.0.set_embedding(id, embedding).await
        }
        async fn insert_run(&self, run: &RunRecord) -> anyhow::Result<()> {
            self.0.insert_run(run).await
        }
        async fn recent_runs(&self, limit: usize) -> anyhow::Result<Vec<RunRecord>> {
            self.0.recent_runs(limit).await
        }
        async fn list_sources(&self) -> anyhow::Result<Vec<Source>> {
            self.0.list_sources().await
        }
        async fn active_sources(&self) -> anyhow::Result<Vec<Source>> {
            self.0.active_sources().await
        }
        async fn create_source(&self, source: &NewSource) -> anyhow::Result<Source> {
            self.0.create_source(source).await
        }
        async fn update_source(&self, id: &str, update: &SourceUpdate) -> anyhow::Result<bool> {
            self.0.update_source(id, update).await
        }
        async fn delete_source(&self, id: &str) -> anyhow::Result<bool> {
            self.0.delete_source(id).await
        }
        async fn record_interaction(&self, event: &InteractionEvent) -> anyhow::Result<()> {
            self.0.record_interaction(event).await
        }
        async fn interactions_for_user(
            &self,
            user_id: &str,
        ) -> anyhow::Result<Vec<InteractionEvent>> {
            self.0.interactions_for_user(user_id).await
        }
        async fn preference_vector(&self, user_id: &str) -> anyhow::Result<Option<Vec<f32>>> {
            self.0.preference_vector(user_id).await
        }
        async fn save_preference_vector(
            &self,
            user_id: &str,
            vector: &[f32],
        ) -> anyhow::Result<()> {
            self.0.save_preference_vector(user_id, vector).await
        }
        async fn toggle_favorite(&self, user_id: &str, item_id: &str) -> anyhow::Result<bool> {
            self.0.toggle_favorite(user_id, item_id).await
        }
        async fn favorites(&self, user_id: &str) -> anyhow::Result<Vec<DigestItem>> {
            self.0.favorites(user_id).await
        }
        async fn mark_read(&self, user_id: &str, item_id: &str) -> anyhow::Result<()> {
            self.0.mark_read(user_id, item_id).await
        }
        async fn engaged_items(
            &self,
            engagement: Engagement,
            from: NaiveDate,
            to: NaiveDate,
            limit: usize,
        ) -> anyhow::Result<Vec<DigestItem>> {
            self.0.engaged_items(engagement, from, to, limit).await
        }
    }

    fn curated(title: &str, day: u32, embedding: Option<Vec<f32>>) -> CuratedItem {
        CuratedItem {
            title: title.into(),
            summary: format!("{title} summary"),
            tldr: String::new(),
            sentiment: Sentiment::Technical,
            category: Category::DevTools,
            source_url: format!("https://example.com/{title}"),
            source_name: "Example".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            embedding,
        }
    }

    fn digest_item(id: &str, embedding: Option<Vec<f32>>) -> DigestItem {
        DigestItem {
            id: id.into(),
            item: curated(id, 1, embedding),
            created_at: Utc::now(),
        }
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_items(&[
                curated("Rust 2.0", 1, Some(vec![1.0, 0.0])),
                curated("Python 4", 2, Some(vec![0.0, 1.0])),
                curated("Rust tooling", 3, None),
            ])
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_rank_filters_and_orders() {
        let candidates = vec![
            digest_item("orthogonal", Some(vec![0.0, 1.0])),
            digest_item("close", Some(vec![0.9, 0.1])),
            digest_item("exact", Some(vec![1.0, 0.0])),
            digest_item("none", None),
            digest_item("mismatch", Some(vec![1.0, 0.0, 0.0])),
        ];
        let hits = rank_by_similarity(&[1.0, 0.0], candidates, 0.3, 10);
        let ids: Vec<_> = hits.iter().map(|h| h.item.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close"]);
        assert!((hits[0].similarity.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_threshold_is_exclusive() {
        let candidates = vec![digest_item("same", Some(vec![1.0, 0.0]))];
        assert!(rank_by_similarity(&[1.0, 0.0], candidates.clone(), 1.0, 10).is_empty());
        assert_eq!(rank_by_similarity(&[1.0, 0.0], candidates, 0.99, 10).len(), 1);
    }

    #[test]
    fn test_rank_truncates() {
        let candidates = (0..5)
            .map(|i| digest_item(&format!("i{i}"), Some(vec![1.0, 0.0])))
            .collect();
        assert_eq!(rank_by_similarity(&[1.0, 0.0], candidates, 0.3, 2).len(), 2);
    }

    #[tokio::test]
    async fn test_semantic_happy_path() {
        let retriever = Retriever::new(seeded_store().await, Arc::new(AxisProvider), 0.3, 8000);
        let out = retriever.semantic("rust", 10).await;
        assert_eq!(out.mode, SearchMode::Semantic);
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.hits[0].item.item.title, "Rust 2.0");
    }

    #[tokio::test]
    async fn test_semantic_falls_back_to_keyword_by_date() {
        let retriever = Retriever::new(seeded_store().await, Arc::new(BrokenProvider), 0.3, 8000);
        let out = retriever.semantic("rust", 10).await;
        assert_eq!(out.mode, SearchMode::Keyword);
        let titles: Vec<_> = out.hits.iter().map(|h| h.item.item.title.as_str()).collect();
        assert_eq!(titles, vec!["Rust tooling", "Rust 2.0"]);
        assert!(out.hits.iter().all(|h| h.similarity.is_none()));
    }

    #[tokio::test]
    async fn test_semantic_falls_back_when_vector_scan_errors() {
        let store = ScanFails(InMemoryStore::new());
        store
            .insert_items(&[
                curated("Rust 2.0", 1, Some(vec![1.0, 0.0])),
                curated("Rust weekly", 4, Some(vec![1.0, 0.0])),
                curated("Python 4", 2, Some(vec![0.0, 1.0])),
                curated("Rust tooling", 3, None),
            ])
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(store), Arc::new(AxisProvider), 0.3, 8000);

        let out = retriever.semantic("rust", 10).await;
        assert_eq!(out.mode, SearchMode::Keyword);
        let titles: Vec<_> = out.hits.iter().map(|h| h.item.item.title.as_str()).collect();
        assert_eq!(titles, vec!["Rust weekly", "Rust tooling", "Rust 2.0"]);
        assert!(out.hits.iter().all(|h| h.similarity.is_none()));
    }

    #[tokio::test]
    async fn test_semantic_without_vectors_uses_keyword() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_items(&[curated("Rust only", 1, None)])
            .await
            .unwrap();
        let retriever = Retriever::new(store, Arc::new(AxisProvider), 0.3, 8000);
        let out = retriever.semantic("rust", 10).await;
        assert_eq!(out.mode, SearchMode::Keyword);
        assert_eq!(out.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let retriever = Retriever::new(seeded_store().await, Arc::new(AxisProvider), 0.3, 8000);
        assert!(retriever.semantic("   ", 10).await.hits.is_empty());
        assert!(retriever.keyword("", 10).await.unwrap().is_empty());
    }
}
