//! Curation classifier.
//!
//! Two modes share one [`CompletionProvider`]:
//!
//! - **filter + summarize** ([`Curator::filter_and_summarize`]) picks the
//!   worthwhile general articles. Any failure yields [`Curation::Empty`].
//! - **summarize only** ([`Curator::summarize_official`]) never drops an
//!   official article. Articles the classifier does not cover, or all of
//!   them when the call fails, get a deterministic local summary.

pub mod parse;
pub mod prompts;
pub mod provider;

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::CurationConfig;
use crate::error::DigestError;
use crate::models::{Article, Category, CuratedItem, Sentiment};
use crate::text::truncate_chars;

use parse::{parse_reply, RawItem};
pub use provider::{
    create_completion_provider, CompletionProvider, DisabledCompletion, OpenRouterCompletion,
};

/// Tldr marking an official item that was summarized locally.
pub const FALLBACK_TLDR: &str = "Official Update (AI Processing Failed)";
const FALLBACK_SUMMARY_CHARS: usize = 200;

/// Result of the filtering mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Curation {
    /// At least one item survived.
    Items(Vec<CuratedItem>),
    /// Nothing usable: no input, a failed call, or an unparseable reply.
    Empty,
}

impl Curation {
    pub fn into_items(self) -> Vec<CuratedItem> {
        match self {
            Curation::Items(items) => items,
            Curation::Empty => Vec::new(),
        }
    }
}

pub struct Curator {
    provider: Arc<dyn CompletionProvider>,
    config: CurationConfig,
}

impl Curator {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: CurationConfig) -> Self {
        Self { provider, config }
    }

    async fn ask(&self, prompt: &str) -> Result<Vec<RawItem>, DigestError> {
        let reply = self
            .provider
            .complete(prompt)
            .await
            .map_err(|e| DigestError::Classification(format!("{e:#}")))?;
        parse_reply(&reply)
    }

    /// Filters and summarizes general articles.
    pub async fn filter_and_summarize(&self, articles: &[Article], date: NaiveDate) -> Curation {
        if articles.is_empty() {
            return Curation::Empty;
        }

        let prompt = prompts::general_prompt(&self.config, articles);
        let raw = match self.ask(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, model = self.provider.model_name(), "curation failed");
                return Curation::Empty;
            }
        };

        let items: Vec<CuratedItem> = raw
            .into_iter()
            .filter_map(|r| normalize_general(r, date))
            .collect();

        info!(input = articles.len(), kept = items.len(), "curated general articles");
        if items.is_empty() {
            Curation::Empty
        } else {
            Curation::Items(items)
        }
    }

    /// Summarizes official articles, one output item per input article, in
    /// input order.
    pub async fn summarize_official(
        &self,
        articles: &[Article],
        date: NaiveDate,
    ) -> Vec<CuratedItem> {
        if articles.is_empty() {
            return Vec::new();
        }

        let prompt = prompts::official_prompt(&self.config, articles);
        let raw = match self.ask(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, count = articles.len(), "official curation failed, using fallback");
                Vec::new()
            }
        };

        reconcile_official(articles, raw, date)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_general(raw: RawItem, date: NaiveDate) -> Option<CuratedItem> {
    let title = non_empty(raw.title)?;
    let source_url = non_empty(raw.source_url)?;

    let category = match raw.category.as_deref().map(Category::parse) {
        Some(Category::OfficialNews) | None => Category::Misc,
        Some(category) => category,
    };

    Some(CuratedItem {
        title,
        summary: non_empty(raw.summary).unwrap_or_default(),
        tldr: non_empty(raw.tldr).unwrap_or_default(),
        sentiment: raw
            .sentiment
            .as_deref()
            .map(Sentiment::parse)
            .unwrap_or(Sentiment::Neutral),
        category,
        source_url,
        source_name: non_empty(raw.source_name).unwrap_or_default(),
        date,
        embedding: None,
    })
}

/// Local summary used when the classifier did not cover an official article.
pub fn official_fallback(article: &Article, date: NaiveDate) -> CuratedItem {
    CuratedItem {
        title: article.title.clone(),
        summary: format!(
            "{}...",
            truncate_chars(&article.summary, FALLBACK_SUMMARY_CHARS)
        ),
        tldr: FALLBACK_TLDR.to_string(),
        sentiment: Sentiment::Neutral,
        category: Category::OfficialNews,
        source_url: article.url.clone(),
        source_name: article.source.clone(),
        date,
        embedding: None,
    }
}

/// Pairs classifier output with the input articles.
///
/// Items are matched by source URL; when the reply has exactly one item per
/// article, unmatched articles fall back to positional pairing, skipping
/// reply items another article already claimed by URL. Anything still
/// unmatched gets [`official_fallback`].
fn reconcile_official(articles: &[Article], raw: Vec<RawItem>, date: NaiveDate) -> Vec<CuratedItem> {
    let positional = raw.len() == articles.len();
    let mut by_url: HashMap<String, usize> = HashMap::new();
    for (i, item) in raw.iter().enumerate() {
        if let Some(url) = item.source_url.as_deref().map(str::trim) {
            by_url.entry(url.to_string()).or_insert(i);
        }
    }
    let claimed: HashSet<usize> = articles
        .iter()
        .filter_map(|a| by_url.get(a.url.as_str()).copied())
        .collect();

    let mut fallbacks = 0usize;
    let items: Vec<CuratedItem> = articles
        .iter()
        .enumerate()
        .map(|(i, article)| {
            let matched = by_url
                .get(article.url.as_str())
                .copied()
                .or_else(|| (positional && !claimed.contains(&i)).then_some(i))
                .and_then(|idx| raw.get(idx));

            match matched.and_then(|r| merge_official(r, article, date)) {
                Some(item) => item,
                None => {
                    fallbacks += 1;
                    official_fallback(article, date)
                }
            }
        })
        .collect();

    if fallbacks > 0 {
        warn!(fallbacks, total = articles.len(), "official items summarized locally");
    }
    items
}

fn merge_official(raw: &RawItem, article: &Article, date: NaiveDate) -> Option<CuratedItem> {
    let summary = non_empty(raw.summary.clone())?;
    Some(CuratedItem {
        title: non_empty(raw.title.clone()).unwrap_or_else(|| article.title.clone()),
        summary,
        tldr: non_empty(raw.tldr.clone()).unwrap_or_default(),
        sentiment: raw
            .sentiment
            .as_deref()
            .map(Sentiment::parse)
            .unwrap_or(Sentiment::Neutral),
        category: Category::OfficialNews,
        source_url: article.url.clone(),
        source_name: non_empty(raw.source_name.clone()).unwrap_or_else(|| article.source.clone()),
        date,
        embedding: None,
    })
}
