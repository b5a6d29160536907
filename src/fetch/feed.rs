//! RSS / Atom / JSON Feed fetcher built on `feed-rs`.

use async_trait::async_trait;
use feed_rs::model::Feed;

use crate::config::FetchConfig;
use crate::error::DigestError;
use crate::models::{Article, Category, Source, SourceKind};
use crate::text::html_to_text;

use super::{get_bytes, http_client, SourceFetcher};

pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetches and parses one feed URL.
    ///
    /// `source_name` labels the articles; when empty, the feed's own title
    /// is used instead.
    pub async fn fetch_url(
        &self,
        url: &str,
        source_name: &str,
        category: Category,
    ) -> Result<Vec<Article>, DigestError> {
        let body = get_bytes(&self.client, url, source_name).await?;
        parse_feed(&body, source_name, category)
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>, DigestError> {
        let category = match source.kind() {
            SourceKind::Feed(category) => category,
            SourceKind::Social => Category::Misc,
        };
        self.fetch_url(&source.url, &source.name, category).await
    }
}

/// Parses a feed document into articles.
pub fn parse_feed(
    body: &[u8],
    source_name: &str,
    category: Category,
) -> Result<Vec<Article>, DigestError> {
    let feed: Feed =
        feed_rs::parser::parse(body).map_err(|e| DigestError::source_fetch(source_name, e))?;

    let label = if !source_name.trim().is_empty() {
        source_name.to_string()
    } else {
        feed.title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Unknown Source".to_string())
    };

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .map(|t| html_to_text(&t.content))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "No Title".to_string());

            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .map(|raw| html_to_text(&raw))
                .unwrap_or_default();

            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();

            Article {
                title,
                summary,
                url,
                source: label.clone(),
                category,
                published_at: entry.published.or(entry.updated),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Dev Weekly</title>
    <link>https://dev.example.com</link>
    <description>news</description>
    <item>
      <title>Cargo gets faster</title>
      <link>https://dev.example.com/cargo</link>
      <description>&lt;p&gt;Build times &lt;b&gt;halved&lt;/b&gt;.&lt;/p&gt;</description>
      <pubDate>Mon, 01 Apr 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <link>https://dev.example.com/untitled</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss_maps_fields() {
        let articles = parse_feed(RSS.as_bytes(), "", Category::DevTools).unwrap();
        assert_eq!(articles.len(), 2);

        let first = &articles[0];
        assert_eq!(first.title, "Cargo gets faster");
        assert_eq!(first.summary, "Build times halved.");
        assert_eq!(first.url, "https://dev.example.com/cargo");
        assert_eq!(first.source, "Dev Weekly");
        assert_eq!(first.category, Category::DevTools);
        assert!(first.published_at.is_some());

        assert_eq!(articles[1].title, "No Title");
        assert_eq!(articles[1].summary, "");
    }

    #[test]
    fn test_configured_name_wins_over_feed_title() {
        let articles = parse_feed(RSS.as_bytes(), "My Feed", Category::Misc).unwrap();
        assert!(articles.iter().all(|a| a.source == "My Feed"));
    }

    #[test]
    fn test_garbage_is_fetch_error() {
        let err = parse_feed(b"not a feed", "Broken", Category::Misc).unwrap_err();
        assert!(matches!(err, DigestError::SourceFetch { .. }));
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new(&FetchConfig::default()).unwrap();
        let err = fetcher
            .fetch_url(&format!("{}/feed", server.uri()), "Down", Category::Misc)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
