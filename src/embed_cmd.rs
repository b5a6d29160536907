//! `digest embed pending`: backfill vectors for items stored without one.
//!
//! Ingestion stores items even when the embedding call fails. This command
//! finds them and retries in batches; a failed batch is counted and
//! skipped so the rest still land.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::store::{DigestStore, SqliteStore};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedReport {
    pub pending: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Embeds up to `limit` items missing a vector, `batch_size` per call.
pub async fn embed_pending(
    store: &dyn DigestStore,
    provider: &dyn EmbeddingProvider,
    max_chars: usize,
    limit: Option<usize>,
    batch_size: usize,
    dry_run: bool,
) -> Result<EmbedReport> {
    let pending = store.items_missing_embeddings(limit).await?;
    let mut report = EmbedReport {
        pending: pending.len(),
        ..Default::default()
    };
    if dry_run || pending.is_empty() {
        return Ok(report);
    }

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|i| i.item.embedding_text()).collect();

        match embedding::embed_texts(provider, &texts, max_chars).await {
            Ok(vectors) => {
                for (item, vector) in batch.iter().zip(vectors.iter()) {
                    store.set_embedding(&item.id, vector).await?;
                    report.embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, size = batch.len(), "embedding batch failed");
                report.failed += batch.len();
            }
        }
    }

    Ok(report)
}

/// CLI entry point.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let store = SqliteStore::open(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let report = embed_pending(
        &store,
        provider.as_ref(),
        config.embedding.max_chars,
        limit,
        batch_size,
        dry_run,
    )
    .await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  items needing embeddings: {}", report.pending);
    } else if report.pending == 0 {
        println!("embed pending");
        println!("  all items up to date");
    } else {
        println!("embed pending");
        println!("  total pending: {}", report.pending);
        println!("  embedded: {}", report.embedded);
        println!("  failed: {}", report.failed);
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::IndexedEmbedding;
    use crate::models::{Category, CuratedItem, Sentiment};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    /// Fails any batch containing a title with "poison".
    struct PickyProvider;

    #[async_trait]
    impl EmbeddingProvider for PickyProvider {
        fn model_name(&self) -> &str {
            "picky"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>> {
            if texts.iter().any(|t| t.contains("poison")) {
                bail!("rejected");
            }
            Ok((0..texts.len())
                .map(|index| IndexedEmbedding {
                    index,
                    embedding: vec![1.0, 2.0, index as f32],
                })
                .collect())
        }
    }

    fn curated(title: &str, embedding: Option<Vec<f32>>) -> CuratedItem {
        CuratedItem {
            title: title.into(),
            summary: "s".into(),
            tldr: "t".into(),
            sentiment: Sentiment::Neutral,
            category: Category::Misc,
            source_url: format!("https://example.com/{title}"),
            source_name: "Example".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_backfill_skips_failed_batches() {
        let store = InMemoryStore::new();
        store
            .insert_items(&[
                curated("a", None),
                curated("b", None),
                curated("poison", None),
                curated("done", Some(vec![0.0, 0.0, 1.0])),
            ])
            .await
            .unwrap();

        let report = embed_pending(&store, &PickyProvider, 8000, None, 2, false)
            .await
            .unwrap();
        assert_eq!(
            report,
            EmbedReport {
                pending: 3,
                embedded: 2,
                failed: 1
            }
        );
        assert_eq!(store.items_missing_embeddings(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = InMemoryStore::new();
        store.insert_items(&[curated("a", None)]).await.unwrap();
        let report = embed_pending(&store, &PickyProvider, 8000, None, 8, true)
            .await
            .unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(report.embedded, 0);
        assert_eq!(store.items_missing_embeddings(None).await.unwrap().len(), 1);
    }
}
