//! Source aggregation.
//!
//! Every active source is fetched on its own task under its own deadline.
//! Errors, timeouts and panics inside one fetch are logged and contribute
//! zero articles; they never abort the batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::fetch::SourceFetcher;
use crate::models::{Article, Source, SourceKind};

pub struct Aggregator {
    feeds: Arc<dyn SourceFetcher>,
    social: Arc<dyn SourceFetcher>,
    per_source_timeout: Duration,
}

impl Aggregator {
    pub fn new(
        feeds: Arc<dyn SourceFetcher>,
        social: Arc<dyn SourceFetcher>,
        per_source_timeout: Duration,
    ) -> Self {
        Self {
            feeds,
            social,
            per_source_timeout,
        }
    }

    /// Fetches all sources concurrently and concatenates what succeeded.
    ///
    /// Output order follows completion order, not source order.
    pub async fn collect(&self, sources: &[Source]) -> Vec<Article> {
        let mut tasks = JoinSet::new();

        for source in sources.iter().cloned() {
            let fetcher = match source.kind() {
                SourceKind::Social => Arc::clone(&self.social),
                SourceKind::Feed(_) => Arc::clone(&self.feeds),
            };
            let deadline = self.per_source_timeout;

            tasks.spawn(async move {
                let outcome = tokio::time::timeout(deadline, fetcher.fetch(&source)).await;
                match outcome {
                    Ok(Ok(articles)) => {
                        info!(source = %source.name, count = articles.len(), "fetched source");
                        articles
                    }
                    Ok(Err(e)) => {
                        warn!(source = %source.name, error = %e, "source fetch failed");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(source = %source.name, timeout = ?deadline, "source fetch timed out");
                        Vec::new()
                    }
                }
            });
        }

        let mut articles = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(found) => articles.extend(found),
                Err(e) => warn!(error = %e, "source fetch task aborted"),
            }
        }

        info!(sources = sources.len(), articles = articles.len(), "aggregation finished");
        articles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DigestError;
    use crate::models::Category;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Yields two articles per source, fails for names starting with
    /// "bad", hangs for names starting with "slow".
    struct ScriptedFetcher;

    #[async_trait]
    impl SourceFetcher for ScriptedFetcher {
        async fn fetch(&self, source: &Source) -> Result<Vec<Article>, DigestError> {
            if source.name.starts_with("bad") {
                return Err(DigestError::source_fetch(&source.name, "HTTP 500"));
            }
            if source.name.starts_with("slow") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok((0..2)
                .map(|i| Article {
                    title: format!("{} {}", source.name, i),
                    summary: String::new(),
                    url: format!("https://example.com/{}/{}", source.name, i),
                    source: source.name.clone(),
                    category: Category::Misc,
                    published_at: None,
                })
                .collect())
        }
    }

    fn source(name: &str, category: &str) -> Source {
        Source {
            id: name.into(),
            url: format!("https://example.com/{name}.xml"),
            name: name.into(),
            category: category.into(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn aggregator(timeout: Duration) -> Aggregator {
        Aggregator::new(Arc::new(ScriptedFetcher), Arc::new(ScriptedFetcher), timeout)
    }

    #[tokio::test]
    async fn test_one_failing_source_does_not_affect_others() {
        let sources: Vec<Source> = ["a", "b", "bad", "c", "d", "e"]
            .iter()
            .map(|n| source(n, "misc"))
            .collect();
        let articles = aggregator(Duration::from_secs(5)).collect(&sources).await;
        assert_eq!(articles.len(), 10);
        assert!(articles.iter().all(|a| a.source != "bad"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_source_is_cut_off() {
        let sources = vec![source("slow", "misc"), source("fast", "reddit")];
        let articles = aggregator(Duration::from_secs(20)).collect(&sources).await;
        assert_eq!(articles.len(), 2);
        assert!(articles.iter().all(|a| a.source == "fast"));
    }

    #[tokio::test]
    async fn test_no_sources() {
        assert!(aggregator(Duration::from_secs(1))
            .collect(&[])
            .await
            .is_empty());
    }
}
