//! Official-sources stream: vendor announcement feeds and listing pages.
//!
//! Each configured source is fetched concurrently and capped at its limit.
//! A failing source contributes nothing and never affects the others.

use futures::future::join_all;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::config::{FetchConfig, OfficialKind, OfficialSourceConfig};
use crate::error::DigestError;
use crate::models::{Article, Category};
use crate::text::collapse_whitespace;

use super::feed::FeedFetcher;
use super::{get_bytes, http_client};

const MIN_TITLE_CHARS: usize = 10;

pub struct OfficialFetcher {
    client: reqwest::Client,
    feeds: FeedFetcher,
    sources: Vec<OfficialSourceConfig>,
}

impl OfficialFetcher {
    pub fn new(config: &FetchConfig, sources: Vec<OfficialSourceConfig>) -> anyhow::Result<Self> {
        let client = http_client(config)?;
        Ok(Self {
            feeds: FeedFetcher::with_client(client.clone()),
            client,
            sources,
        })
    }

    /// Fetches every official source; failures are logged and skipped.
    pub async fn fetch_all(&self) -> Vec<Article> {
        let results = join_all(self.sources.iter().map(|s| self.fetch_one(s))).await;

        let mut articles = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(found) => {
                    info!(source = %source.name, count = found.len(), "fetched official source");
                    articles.extend(found);
                }
                Err(e) => warn!(source = %source.name, error = %e, "official source failed"),
            }
        }
        articles
    }

    async fn fetch_one(&self, source: &OfficialSourceConfig) -> Result<Vec<Article>, DigestError> {
        let mut articles = match source.kind {
            OfficialKind::Feed => self.fetch_feed(source).await?,
            OfficialKind::Listing => {
                let prefix = source.path_prefix.as_deref().unwrap_or("/");
                let body = get_bytes(&self.client, &source.url, &source.name).await?;
                let html = String::from_utf8_lossy(&body);
                parse_listing(&html, &source.url, &source.name, prefix)?
            }
        };
        articles.truncate(source.limit);
        Ok(articles)
    }

    async fn fetch_feed(&self, source: &OfficialSourceConfig) -> Result<Vec<Article>, DigestError> {
        let primary = self
            .feeds
            .fetch_url(&source.url, &source.name, Category::OfficialNews)
            .await;

        match (primary, &source.fallback_url) {
            (Ok(articles), _) => Ok(articles),
            (Err(e), Some(fallback)) => {
                warn!(source = %source.name, error = %e, fallback = %fallback, "trying fallback feed");
                self.feeds
                    .fetch_url(fallback, &source.name, Category::OfficialNews)
                    .await
            }
            (Err(e), None) => Err(e),
        }
    }
}

/// Scheme and host of `url`, without a trailing slash.
fn origin_of(url: &str) -> &str {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => &url[..after_scheme + i],
        None => url,
    }
}

/// Extracts article links from a listing page.
///
/// Links whose href starts with `prefix` are articles; the anchor text is
/// the title and the paragraphs of the nearest enclosing `div` form the
/// summary. Short titles, the index link itself and repeated hrefs are
/// skipped.
pub fn parse_listing(
    html: &str,
    page_url: &str,
    source_name: &str,
    prefix: &str,
) -> Result<Vec<Article>, DigestError> {
    let links = Selector::parse(&format!("a[href^='{prefix}']"))
        .map_err(|e| DigestError::source_fetch(source_name, format!("bad selector: {e}")))?;
    let paragraphs = Selector::parse("p")
        .map_err(|e| DigestError::source_fetch(source_name, format!("bad selector: {e}")))?;

    let doc = Html::parse_document(html);
    let origin = origin_of(page_url);
    let index_href = prefix.trim_end_matches('/');

    let mut seen = HashSet::new();
    let mut articles = Vec::new();

    for anchor in doc.select(&links) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href == prefix || href == index_href {
            continue;
        }

        let title = collapse_whitespace(&anchor.text().collect::<String>());
        if title.chars().count() < MIN_TITLE_CHARS || !seen.insert(href.to_string()) {
            continue;
        }

        let summary = anchor
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "div")
            .map(|div| {
                let text: Vec<String> = div
                    .select(&paragraphs)
                    .map(|p| p.text().collect::<String>())
                    .collect();
                collapse_whitespace(&text.join(" "))
            })
            .unwrap_or_default();

        articles.push(Article {
            title,
            summary,
            url: format!("{origin}{href}"),
            source: source_name.to_string(),
            category: Category::OfficialNews,
            published_at: None,
        });
    }

    Ok(articles)
}
